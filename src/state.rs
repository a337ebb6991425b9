//! Script execution state
//!
//! Holds mutable per-script state: the sandbox root and current
//! subdirectory, `D` definitions, the groups of the last match, the
//! current timeout, and the log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ScriptError;

/// Mutable state for a single script execution
#[derive(Debug)]
pub struct State {
    /// Sandbox root for this script
    pub workdir: PathBuf,
    /// Current directory (changed by `C`)
    pub pwd: PathBuf,
    /// Variables set with `D`
    vars: HashMap<String, String>,
    /// Groups of the last `>` comparison; `${0}` is the whole match
    pub groups: Vec<String>,
    /// Deadline applied to each program run (`None` = unlimited)
    pub timeout: Option<Duration>,
    /// Execution log
    pub log: String,
}

impl State {
    /// Create a new State rooted at the given sandbox directory
    pub fn new(workdir: PathBuf, timeout: Option<Duration>) -> Self {
        let pwd = workdir.clone();
        Self {
            workdir,
            pwd,
            vars: HashMap::new(),
            groups: Vec::new(),
            timeout,
            log: String::new(),
        }
    }

    /// Set (or overwrite) a variable
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Substitute `${...}` in a script line (comments are left alone)
    pub fn substitute(&self, line: &str) -> Result<String, ScriptError> {
        crate::subst::substitute(line, &self.vars, &self.groups)
    }

    /// Substitute `${...}` in an expected-output line
    pub fn expand(&self, line: &str) -> Result<String, ScriptError> {
        crate::subst::expand(line, &self.vars, &self.groups)
    }

    /// Resolve a path relative to the current directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            clean_path(p)
        } else {
            clean_path(&self.pwd.join(path))
        }
    }

    /// Switch to `workdir/name`, creating it if needed. An empty name goes
    /// back to the sandbox root.
    pub fn chdir(&mut self, name: &str) -> Result<(), std::io::Error> {
        if name.is_empty() {
            self.pwd = self.workdir.clone();
            return Ok(());
        }
        let dir = clean_path(&self.workdir.join(name));
        if !dir.starts_with(clean_path(&self.workdir)) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!(
                    "path escapes sandbox: {} (workdir: {})",
                    name,
                    self.workdir.display(),
                ),
            ));
        }
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        self.pwd = dir;
        Ok(())
    }

    /// Write a log entry
    pub fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

/// Clean a path by resolving `.` and `..` components lexically.
///
/// Unlike `canonicalize()`, this does not require the path to exist on disk.
fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut components = Vec::new();
    let mut has_root = false;
    let mut prefix: Option<Component> = None;

    for component in path.components() {
        match component {
            Component::RootDir => {
                has_root = true;
                components.clear();
            }
            Component::Prefix(_) => {
                prefix = Some(component);
                components.clear();
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // '..' at the root is dropped; leading '..' of a relative path is kept
                match components.last() {
                    Some(Component::Normal(_)) => {
                        components.pop();
                    }
                    _ if !has_root => components.push(component),
                    _ => {}
                }
            }
            Component::Normal(_) => components.push(component),
        }
    }

    if components.is_empty() && !has_root && prefix.is_none() {
        return PathBuf::from(".");
    }

    let mut result = PathBuf::new();
    if let Some(p) = prefix {
        result.push(p);
    }
    if has_root {
        result.push(std::path::MAIN_SEPARATOR.to_string());
    }
    for c in &components {
        result.push(c);
    }
    result
}
