//! `${...}` substitution
//!
//! `${N}` (decimal digits) refers to capture group N of the last `>` block;
//! anything else names a variable set with `D`. Expansion is repeated so a
//! variable may be defined in terms of another.

use std::collections::HashMap;
use std::sync::OnceLock;
use regex::{Captures, Regex};
use crate::error::{ErrorKind, ScriptError};

/// Upper bound on expansion passes. A self-referential definition stops
/// here instead of looping forever.
pub const MAX_PASSES: usize = 10;

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("static regex"))
}

/// A line whose first non-blank character is `#`.
pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Expand every `${key}` in `line` until nothing changes (at most
/// [`MAX_PASSES`] times). Comment lines are returned untouched.
pub fn substitute(
    line: &str,
    vars: &HashMap<String, String>,
    groups: &[String],
) -> Result<String, ScriptError> {
    if is_comment(line) {
        return Ok(line.to_string());
    }
    expand(line, vars, groups)
}

/// Like [`substitute`], but without the comment exemption. Used for the
/// expected-output lines of a `>` block, which are never directives.
pub fn expand(
    line: &str,
    vars: &HashMap<String, String>,
    groups: &[String],
) -> Result<String, ScriptError> {
    let mut current = line.to_string();
    for _ in 0..MAX_PASSES {
        let next = substitute_once(&current, vars, groups)?;
        if next == current {
            break;
        }
        current = next;
    }
    Ok(current)
}

/// A single left-to-right pass.
fn substitute_once(
    line: &str,
    vars: &HashMap<String, String>,
    groups: &[String],
) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for caps in reference_re().captures_iter(line) {
        let whole = caps.get(0).expect("group 0 always present");
        out.push_str(&line[last..whole.start()]);
        out.push_str(resolve(&caps, vars, groups)?);
        last = whole.end();
    }
    out.push_str(&line[last..]);
    Ok(out)
}

fn resolve<'a>(
    caps: &Captures<'_>,
    vars: &'a HashMap<String, String>,
    groups: &'a [String],
) -> Result<&'a str, ScriptError> {
    let key = &caps[1];
    if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
        return key.parse::<usize>().ok()
            .and_then(|n| groups.get(n))
            .map(|s| s.as_str())
            .ok_or_else(|| ScriptError::new(ErrorKind::UndefinedGroup,
                format!("nonexistent group: {{{}}}", key)));
    }
    vars.get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| ScriptError::new(ErrorKind::UndefinedVariable,
            format!("undefined substitution: ${{{}}}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_plain_line_unchanged() {
        let out = substitute("> log\n", &HashMap::new(), &[]).unwrap();
        assert_eq!(out, "> log\n");
    }

    #[test]
    fn test_variable() {
        let v = vars(&[("UID", "a1b2")]);
        assert_eq!(substitute("> checkout ${UID} -- f.txt", &v, &[]).unwrap(),
            "> checkout a1b2 -- f.txt");
    }

    #[test]
    fn test_chained_variables() {
        let v = vars(&[("A", "x"), ("B", "${A}y")]);
        assert_eq!(substitute("${B}", &v, &[]).unwrap(), "xy");
    }

    #[test]
    fn test_group_reference() {
        let groups = vec!["foobar".to_string(), "bar".to_string()];
        assert_eq!(substitute("${0}/${1}", &HashMap::new(), &groups).unwrap(), "foobar/bar");
    }

    #[test]
    fn test_undefined_group() {
        let groups = vec!["whole".to_string()];
        let err = substitute("${1}", &HashMap::new(), &groups).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedGroup);
    }

    #[test]
    fn test_undefined_variable() {
        let err = substitute("= ${NOPE} x", &HashMap::new(), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
        assert!(err.message.contains("${NOPE}"));
    }

    #[test]
    fn test_comment_exempt() {
        let line = "  # uses ${UNDEFINED}\n";
        assert_eq!(substitute(line, &HashMap::new(), &[]).unwrap(), line);
    }

    #[test]
    fn test_expand_ignores_comment_marker() {
        let v = vars(&[("N", "3")]);
        assert_eq!(expand("# ${N} files", &v, &[]).unwrap(), "# 3 files");
    }

    #[test]
    fn test_self_reference_stops() {
        // Each pass appends one more "a"; expansion stops after MAX_PASSES.
        let v = vars(&[("X", "a${X}")]);
        let out = substitute("${X}", &v, &[]).unwrap();
        assert!(out.starts_with(&"a".repeat(MAX_PASSES)));
        assert!(out.ends_with("${X}"));
    }

    #[test]
    fn test_shortest_reference() {
        let v = vars(&[("A", "1"), ("B", "2")]);
        assert_eq!(substitute("${A}}${B}", &v, &[]).unwrap(), "1}2");
    }

    #[test]
    fn test_unclosed_reference_left_alone() {
        assert_eq!(substitute("cost ${", &HashMap::new(), &[]).unwrap(), "cost ${");
    }
}
