//! Output comparison for `>` blocks
//!
//! Both sides are normalized first (line endings unified, trailing blanks
//! dropped, leading blanks folded to one space). A `<<<` block then compares
//! by edit distance against a tolerance; a `<<<*` block treats the expected
//! lines as one regex that must match the whole output. Patterns use
//! `fancy_regex`, so lookaround and backreferences are available.

use std::sync::OnceLock;
use regex::Regex;
use similar::TextDiff;
use crate::error::{ErrorKind, ScriptError};

fn trailing_blanks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("static regex"))
}

fn leading_blanks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]+").expect("static regex"))
}

/// Turn `\r\n` and lone `\r` into `\n`, drop spaces/tabs before each newline
/// and fold leading spaces/tabs on each line into a single space.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = trailing_blanks_re().replace_all(&text, "\n");
    leading_blanks_re().replace_all(&text, " ").into_owned()
}

/// Levenshtein distance over characters, unit cost for insert, delete and
/// substitute.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            row[j] = (prev[j] + 1)
                .min(row[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Result of comparing one block of expected lines against program output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Whether the output was accepted
    pub matched: bool,
    /// New value for the `${N}` groups. Index 0 is the whole match (or the
    /// whole output when there was no regex match).
    pub groups: Vec<String>,
}

/// Compares expected lines with actual output
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMatcher {
    /// Largest edit distance still accepted in literal mode
    pub tolerance: usize,
}

impl OutputMatcher {
    pub fn new(tolerance: usize) -> Self {
        Self { tolerance }
    }

    pub fn check(
        &self,
        expected: &[String],
        actual: &str,
        is_regexp: bool,
    ) -> Result<MatchOutcome, ScriptError> {
        let expected = normalize(&expected.join("\n"));
        let actual = normalize(actual);

        if is_regexp {
            return self.check_regexp(&expected, &actual);
        }

        let distance = edit_distance(expected.trim_end(), actual.trim_end());
        Ok(MatchOutcome {
            matched: distance <= self.tolerance,
            groups: vec![actual],
        })
    }

    fn check_regexp(&self, expected: &str, actual: &str) -> Result<MatchOutcome, ScriptError> {
        let re = compile_anchored(expected.trim_end())?;

        let caps = match re.captures(actual).map_err(bad_pattern)? {
            Some(caps) => Some(caps),
            None => re.captures(actual.trim_end()).map_err(bad_pattern)?,
        };
        let Some(caps) = caps else {
            return Ok(MatchOutcome {
                matched: false,
                groups: vec![actual.to_string()],
            });
        };

        let groups = caps.iter()
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        Ok(MatchOutcome { matched: true, groups })
    }
}

/// Anchor `pattern` so it has to cover the whole subject.
fn compile_anchored(pattern: &str) -> Result<fancy_regex::Regex, ScriptError> {
    fancy_regex::Regex::new(&format!(r"^(?:{})\z", pattern)).map_err(bad_pattern)
}

fn bad_pattern(e: fancy_regex::Error) -> ScriptError {
    ScriptError::new(ErrorKind::BadPattern, format!("bad pattern: {}", e))
}

/// Unified diff of expected vs. actual output, for the execution log.
pub fn render_diff(expected: &[String], actual: &str) -> String {
    let mut expected = normalize(&expected.join("\n"));
    if !expected.is_empty() {
        expected.push('\n');
    }
    let actual = normalize(actual);
    TextDiff::from_lines(&expected, &actual)
        .unified_diff()
        .header("expected", "actual")
        .to_string()
}
