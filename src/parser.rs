//! Script line parser
//!
//! Each directive is a single tag character at the very start of the line
//! followed by whitespace-separated operands:
//!
//! - `#` comment, blank lines are ignored
//! - `I file` include (at least one blank after `I`)
//! - `C [dir]` change sandbox subdirectory
//! - `T secs` set the timeout
//! - `+ name fixture` copy a fixture into the sandbox
//! - `- name` delete a file
//! - `> args` run the program; the expected output block follows
//! - `= name fixture` compare a file with a fixture
//! - `* name` file must not exist
//! - `E name` file or directory must exist
//! - `D NAME "value"` define a variable
//!
//! Blanks between the tag and the first operand are optional (`+a b` is
//! fine), and text after the last operand is ignored. Substitution has
//! already been applied by the time a line reaches the parser.

use crate::error::ScriptError;
use crate::source::LineId;
use crate::subst::is_comment;

/// One parsed directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Comment or blank line
    Comment,
    /// `I file`
    Include(String),
    /// `C [dir]`; an empty name means the sandbox root
    ChangeDir(String),
    /// `T secs`, unparsed
    SetTimeout(String),
    /// `+ dest src`
    Copy { dest: String, src: String },
    /// `- name`
    Delete(String),
    /// `> args`; the expected-output block is read by the engine
    Run(String),
    /// `= name expected`
    CheckFileContent { name: String, expected: String },
    /// `* name`
    CheckAbsent(String),
    /// `E name`
    CheckPresent(String),
    /// `D NAME "value"`
    Define { name: String, value: String },
}

/// A parsed script line
#[derive(Debug, Clone)]
pub struct ScriptLine {
    pub directive: Directive,
    /// Line text after substitution, terminator included
    pub raw: String,
    pub id: LineId,
}

/// Terminator of a `>` block: `<<<` or `<<<*` at the start of the line.
/// Returns `Some(is_regexp)` for a terminator line.
pub fn parse_block_end(line: &str) -> Option<bool> {
    line.strip_prefix("<<<").map(|rest| rest.starts_with('*'))
}

/// Parse a single (already substituted) line.
pub fn parse_line(line: &str, id: &LineId) -> Result<ScriptLine, ScriptError> {
    let directive = parse_directive(line).ok_or_else(|| {
        ScriptError::syntax(format!("bad test line at {}: {}", id, line.trim_end()))
    })?;
    Ok(ScriptLine {
        directive,
        raw: line.to_string(),
        id: id.clone(),
    })
}

fn parse_directive(line: &str) -> Option<Directive> {
    if is_comment(line) || line.trim().is_empty() {
        return Some(Directive::Comment);
    }

    let mut chars = line.chars();
    let tag = chars.next()?;
    let rest = chars.as_str();

    match tag {
        'I' => {
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            first_operand(rest).map(Directive::Include)
        }
        'C' => Some(Directive::ChangeDir(first_operand(rest).unwrap_or_default())),
        'T' => first_operand(rest).map(Directive::SetTimeout),
        '+' => two_operands(rest).map(|(dest, src)| Directive::Copy { dest, src }),
        '-' => first_operand(rest).map(Directive::Delete),
        '>' => {
            let rest = rest.trim_start();
            let command = rest.split('\n').next().unwrap_or("").trim_end();
            Some(Directive::Run(command.to_string()))
        }
        '=' => two_operands(rest)
            .map(|(name, expected)| Directive::CheckFileContent { name, expected }),
        '*' => first_operand(rest).map(Directive::CheckAbsent),
        'E' => first_operand(rest).map(Directive::CheckPresent),
        'D' => parse_define(rest),
        _ => None,
    }
}

fn first_operand(rest: &str) -> Option<String> {
    rest.split_whitespace().next().map(|s| s.to_string())
}

fn two_operands(rest: &str) -> Option<(String, String)> {
    let mut words = rest.split_whitespace();
    let a = words.next()?;
    let b = words.next()?;
    Some((a.to_string(), b.to_string()))
}

/// `NAME "value"`: the value runs from the first quote after the name to
/// the last quote on the line, which may only be followed by blanks.
fn parse_define(rest: &str) -> Option<Directive> {
    let rest = rest.trim_start();
    let name_len = rest
        .char_indices()
        .find(|&(i, c)| {
            let ident = c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit());
            !ident
        })
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }
    let (name, rest) = rest.split_at(name_len);

    let body = rest.trim_start().strip_prefix('"')?;
    let value = body.trim_end().strip_suffix('"')?;
    Some(Directive::Define {
        name: name.to_string(),
        value: value.to_string(),
    })
}
