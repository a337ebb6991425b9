//! Script line source
//!
//! Reads a script one physical line at a time. An `I` directive pushes the
//! included file on top of a stack of readers; its lines come next, then the
//! including file resumes where it left off. Line ids record the nesting:
//! line 3 of a file included from line 12 is `12.3`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use crate::error::{ErrorKind, ScriptError};

/// Position of a line within a (possibly nested) script, e.g. `12.3`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineId(Vec<usize>);

impl LineId {
    /// Id of line `n` of a file included at `self`.
    pub fn child(&self, n: usize) -> LineId {
        let mut parts = self.0.clone();
        parts.push(n);
        LineId(parts)
    }

    pub fn parts(&self) -> &[usize] {
        &self.0
    }

    /// Line number within the top-level script.
    pub fn top(&self) -> Option<usize> {
        self.0.first().copied()
    }
}

impl From<Vec<usize>> for LineId {
    fn from(parts: Vec<usize>) -> Self {
        LineId(parts)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, n) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", n)?;
        }
        Ok(())
    }
}

/// One open file on the include stack
struct Frame {
    path: PathBuf,
    /// Canonical path, for cycle detection
    canonical: PathBuf,
    reader: BufReader<File>,
    /// Id of the line that included this file (empty for the top-level script)
    prefix: LineId,
    /// Number of lines read so far
    line_no: usize,
}

impl Frame {
    fn open(path: &Path, prefix: LineId) -> Result<Self, ScriptError> {
        let file = File::open(path).map_err(|_| {
            ScriptError::new(ErrorKind::FileNotFound,
                format!("file {} not found", path.display()))
        })?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path: path.to_path_buf(),
            canonical,
            reader: BufReader::new(file),
            prefix,
            line_no: 0,
        })
    }
}

/// Produces `(LineId, line)` pairs from a script and the files it includes.
///
/// Lines are returned with their terminator (`\n`, and `\r` if the file has
/// CRLF endings). `None` marks the end of the top-level script.
pub struct LineSource {
    stack: Vec<Frame>,
    included: Vec<PathBuf>,
}

impl LineSource {
    /// Open the top-level script
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let frame = Frame::open(path.as_ref(), LineId::default())?;
        Ok(Self {
            stack: vec![frame],
            included: Vec::new(),
        })
    }

    /// Read the next line, descending into and returning from included files
    /// as needed.
    pub fn next_line(&mut self) -> Result<Option<(LineId, String)>, ScriptError> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };

            let mut buf = Vec::new();
            let n = frame.reader.read_until(b'\n', &mut buf).map_err(|e| {
                ScriptError::new(ErrorKind::Io,
                    format!("{}: {}", frame.path.display(), e))
            })?;

            if n == 0 {
                // Exhausted: resume the including file, if any.
                // The top-level frame stays so `current_file` remains valid.
                if self.stack.len() == 1 {
                    return Ok(None);
                }
                self.stack.pop();
                continue;
            }

            frame.line_no += 1;
            let id = frame.prefix.child(frame.line_no);
            return Ok(Some((id, String::from_utf8_lossy(&buf).into_owned())));
        }
    }

    /// Splice `path` into the stream right after the line `at`.
    pub fn include(&mut self, path: impl AsRef<Path>, at: &LineId) -> Result<(), ScriptError> {
        let frame = Frame::open(path.as_ref(), at.clone())?;
        if self.stack.iter().any(|f| f.canonical == frame.canonical) {
            return Err(ScriptError::new(ErrorKind::IncludeCycle,
                format!("include cycle: {} includes itself", path.as_ref().display())));
        }
        self.included.push(frame.path.clone());
        self.stack.push(frame);
        Ok(())
    }

    /// The file the most recently returned line came from.
    pub fn current_file(&self) -> &Path {
        self.stack.last().map(|f| f.path.as_path()).unwrap_or_else(|| Path::new(""))
    }

    /// Include depth of the most recently returned line (0 = top-level).
    pub fn depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    /// Every file included so far, in the order first included.
    pub fn included_files(&self) -> &[PathBuf] {
        &self.included
    }
}
