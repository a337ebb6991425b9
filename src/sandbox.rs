//! Sandbox directories and program execution
//!
//! Every script runs in its own directory, `<root>/<name>_<n>`, which is
//! removed when the script finishes unless the caller asked to keep it.
//! The program under test is reached through the [`Executor`] trait so the
//! interpreter can be driven by a fake in tests.

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, ScriptError};

/// Number of `<name>_<n>` suffixes tried before giving up.
pub const MAX_DIR_ATTEMPTS: usize = 100;

/// How often a running program is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ──────────────────────────────────────────────────────────
// Sandbox directories
// ──────────────────────────────────────────────────────────

/// Create the first free `root/base_0` … `root/base_99`.
pub fn create_isolated_dir(root: &Path, base: &str) -> Result<PathBuf, ScriptError> {
    for n in 0..MAX_DIR_ATTEMPTS {
        let candidate = root.join(format!("{}_{}", base, n));
        if std::fs::create_dir(&candidate).is_ok() {
            return Ok(candidate);
        }
    }
    Err(ScriptError::new(ErrorKind::ResourceExhausted,
        format!("could not create temp directory for {}", base)))
}

/// Remove a directory tree. A directory that is already gone is fine.
pub fn release_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// A sandbox directory that removes itself on drop unless kept.
#[derive(Debug)]
pub struct SandboxDir {
    path: PathBuf,
    keep: bool,
}

impl SandboxDir {
    pub fn create(root: &Path, base: &str, keep: bool) -> Result<Self, ScriptError> {
        let path = create_isolated_dir(root, base)?;
        tracing::debug!(dir = %path.display(), "created sandbox");
        Ok(Self { path, keep })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        if self.keep {
            tracing::info!(dir = %self.path.display(), "directory state saved");
            return;
        }
        if let Err(e) = release_dir(&self.path) {
            tracing::warn!(dir = %self.path.display(), error = %e, "failed to remove sandbox");
        }
    }
}

// ──────────────────────────────────────────────────────────
// Execution
// ──────────────────────────────────────────────────────────

/// What happened when the program under test was run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Exit status 0, with merged stdout/stderr
    Ok(String),
    /// Non-zero exit (code is `None` when killed by a signal)
    NonZeroExit { code: Option<i32>, output: String },
    /// Deadline passed; the program was killed and its output dropped
    Timeout,
    /// The program could not be started
    SpawnFailed(String),
}

/// Runs the program under test.
pub trait Executor {
    /// Run the program with `args` appended to its command line, in
    /// `working_dir`, with empty stdin. `None` means no deadline.
    fn invoke(&self, args: &str, working_dir: &Path, timeout: Option<Duration>) -> ExecOutcome;

    /// Run the program with a debugger listening, for step-into. The
    /// debugger's banner line is not part of the returned output.
    fn invoke_debug(&self, args: &str, working_dir: &Path) -> ExecOutcome {
        self.invoke(args, working_dir, None)
    }
}

/// Runs a configured command line through the system shell.
#[derive(Debug, Clone)]
pub struct ProgramExecutor {
    /// Command line the script arguments are appended to, e.g. `staff-gitlet`
    pub program: String,
    /// Command line used for step-into. Its first output line (the
    /// debugger's banner) is dropped. Without it, step-into runs `program`
    /// untimed.
    pub debug_program: Option<String>,
}

impl ProgramExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            debug_program: None,
        }
    }

    pub fn with_debug_program(mut self, debug_program: impl Into<String>) -> Self {
        self.debug_program = Some(debug_program.into());
        self
    }
}

impl Executor for ProgramExecutor {
    fn invoke(&self, args: &str, working_dir: &Path, timeout: Option<Duration>) -> ExecOutcome {
        run_shell(&join_command(&self.program, args), working_dir, timeout)
    }

    fn invoke_debug(&self, args: &str, working_dir: &Path) -> ExecOutcome {
        let Some(ref program) = self.debug_program else {
            return self.invoke(args, working_dir, None);
        };
        match run_shell(&join_command(program, args), working_dir, None) {
            ExecOutcome::Ok(out) => ExecOutcome::Ok(drop_first_line(&out)),
            ExecOutcome::NonZeroExit { code, output } => ExecOutcome::NonZeroExit {
                code,
                output: drop_first_line(&output),
            },
            other => other,
        }
    }
}

fn join_command(program: &str, args: &str) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args)
    }
}

fn drop_first_line(out: &str) -> String {
    out.split_once('\n').map(|(_, rest)| rest.to_string()).unwrap_or_default()
}

/// Build a shell invocation whose stdout carries both output streams.
fn shell_command(line: &str) -> ProcessCommand {
    #[cfg(windows)]
    {
        let mut cmd = ProcessCommand::new("cmd");
        cmd.arg("/C").arg(format!("{} 2>&1", line));
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = ProcessCommand::new("sh");
        cmd.arg("-c").arg(format!("exec 2>&1; exec {}", line));
        cmd
    }
}

/// Run `line` in `dir` and collect its merged output.
///
/// The output pipe is drained on a helper thread while this thread polls
/// for exit, so a program writing more than a pipe buffer cannot stall
/// against the deadline. The deadline also covers reading to end of output,
/// which a leftover background process can hold open.
fn run_shell(line: &str, dir: &Path, timeout: Option<Duration>) -> ExecOutcome {
    let mut cmd = shell_command(line);
    cmd.current_dir(dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return ExecOutcome::SpawnFailed(format!("failed to execute '{}': {}", line, e)),
    };

    let (tx, rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    } else {
        drop(tx);
    }

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if timeout.is_some_and(|limit| start.elapsed() > limit) {
                    let _ = child.kill();
                    let _ = child.wait();
                    // The reader finishes on its own once the pipe closes.
                    tracing::debug!(command = line, "killed after timeout");
                    return ExecOutcome::Timeout;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return ExecOutcome::SpawnFailed(format!("failed to wait: {}", e)),
        }
    };

    let received = match timeout {
        Some(limit) => match rx.recv_timeout(limit.saturating_sub(start.elapsed())) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::debug!(command = line, "output still open after timeout");
                return ExecOutcome::Timeout;
            }
            other => other.ok(),
        },
        None => rx.recv().ok(),
    };
    let output = received
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default();

    if status.success() {
        ExecOutcome::Ok(output)
    } else {
        ExecOutcome::NonZeroExit { code: status.code(), output }
    }
}

// ──────────────────────────────────────────────────────────
// Step-debug decisions
// ──────────────────────────────────────────────────────────

/// Operator choice before each `>` in step-debug mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Run the command normally (step over)
    Next,
    /// Run the command under the debugger
    StepInto,
    /// Stop the current script
    Quit,
}

/// Supplies step-debug decisions.
pub trait DecisionSource {
    fn decide(&mut self, command: &str) -> StepDecision;
}

/// Banner shown once when step-debug mode starts.
pub const DEBUG_BANNER: &str = "\
   ============================================================================
  |                   ~~~~~  You are in debug mode  ~~~~~                      |
  |   In this mode, you will be shown each command from the test case.         |
  |                                                                            |
  |   There are three commands:                                                |
  |                                                                            |
  |   1. 'n' - type in 'n' to go to the next command without debugging the     |
  |            current one (step over).                                        |
  |                                                                            |
  |   2. 's' - type in 's' to debug the current command (step into).           |
  |            Make sure to set breakpoints!                                   |
  |                                                                            |
  |   3. 'q' - type in 'q' to quit and stop debugging. If you had the `--keep` |
  |            flag, then your directory state will be saved and you can       |
  |            investigate it.                                                 |
   ============================================================================
";

/// Prompts on a terminal (or any reader/writer pair).
pub struct ConsoleDecisions<R, W> {
    input: R,
    output: W,
    /// Shown in front of each command, e.g. `staff-gitlet`
    program: String,
}

impl ConsoleDecisions<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompt on the process's own stdin/stdout.
    pub fn stdio(program: impl Into<String>) -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout(), program)
    }
}

impl<R: BufRead, W: Write> ConsoleDecisions<R, W> {
    pub fn new(input: R, output: W, program: impl Into<String>) -> Self {
        Self {
            input,
            output,
            program: program.into(),
        }
    }

    fn prompt(&mut self) -> Option<String> {
        let _ = write!(self.output, "> ");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_lowercase()),
        }
    }
}

impl<R: BufRead, W: Write> DecisionSource for ConsoleDecisions<R, W> {
    fn decide(&mut self, command: &str) -> StepDecision {
        let _ = writeln!(self.output, ">>> {} {}", self.program, command);
        loop {
            // End of input counts as quit.
            let Some(answer) = self.prompt() else {
                return StepDecision::Quit;
            };
            match answer.as_str() {
                "n" => return StepDecision::Next,
                "s" => {
                    let _ = writeln!(self.output,
                        "Ready to debug the command `{} {}`", self.program, command);
                    let _ = writeln!(self.output,
                        "Attach your debugger now. Don't forget to set a breakpoint!");
                    return StepDecision::StepInto;
                }
                "q" => return StepDecision::Quit,
                _ => {
                    let _ = writeln!(self.output, "Please enter either 'n', 's' or 'q'.");
                }
            }
        }
    }
}
