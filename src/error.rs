//! Script errors

use std::fmt;
use crate::source::LineId;

/// The kind of script error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Program output did not match the expected lines
    Mismatch,
    /// Program exited with a non-zero status
    NonZeroExit,
    /// Program did not finish before the deadline
    Timeout,
    /// Program could not be started at all
    CommandFailed,
    /// `=` comparison failed
    ComparisonFailed,
    /// `*` found a file that should not exist
    FileExists,
    /// `E` did not find a file or directory
    FileMissing,
    /// `+` could not copy a fixture
    CopyFailed,
    /// Expected lines of a `<<<*` block are not a valid regex
    BadPattern,
    /// `${name}` with no matching `D` definition
    UndefinedVariable,
    /// `${N}` past the end of the last match groups
    UndefinedGroup,
    /// No free sandbox directory name
    ResourceExhausted,
    /// Unrecognized directive line
    SyntaxError,
    /// `>` block with no closing `<<<`
    Unterminated,
    /// Script or included file could not be opened
    FileNotFound,
    /// A file includes itself, directly or indirectly
    IncludeCycle,
    /// Operator quit from step-debug mode (not a failure)
    UserQuit,
    /// IO error
    Io,
}

impl ErrorKind {
    /// Whether this error means the script itself is defective, as opposed
    /// to the program under test misbehaving.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ErrorKind::SyntaxError
                | ErrorKind::Unterminated
                | ErrorKind::FileNotFound
                | ErrorKind::IncludeCycle
        )
    }
}

/// A script error with file/line context
#[derive(Debug)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<LineId>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: LineId) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Attach a location unless one is already present (errors raised deeper
    /// down, e.g. inside an included file, keep their own).
    pub fn or_location(self, file: impl Into<String>, line: &LineId) -> Self {
        if self.line.is_some() {
            self
        } else {
            self.with_location(file, line.clone())
        }
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, msg)
    }

    pub fn quit() -> Self {
        Self::new(ErrorKind::UserQuit, "user exit")
    }

    pub fn is_quit(&self) -> bool {
        self.kind == ErrorKind::UserQuit
    }

    pub fn is_malformed(&self) -> bool {
        self.kind.is_malformed()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(ref line) = self.line {
            write!(f, "{}:", line)?;
        }
        if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}
