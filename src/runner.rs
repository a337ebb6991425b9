//! Test runner
//!
//! Orchestrates running `.in` scripts: discovers them, gives each its own
//! sandbox directory, runs the script, and turns the outcome into a
//! [`Verdict`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::engine::Engine;
use crate::error::ScriptError;
use crate::matcher::OutputMatcher;
use crate::sandbox::{ConsoleDecisions, DecisionSource, Executor, ProgramExecutor, SandboxDir};
use crate::source::{LineId, LineSource};
use crate::state::State;

/// Default per-command deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding the fixtures referenced by `+` and `=`
    pub fixtures: PathBuf,
    /// Directory the per-script sandboxes are created in
    pub workdir_root: PathBuf,
    /// Initial deadline for each `>` (`None` = unlimited); `T` overrides it
    pub timeout: Option<Duration>,
    /// Edit distance still accepted for literal `<<<` blocks
    pub tolerance: usize,
    /// Keep sandbox directories after the script finishes
    pub keep: bool,
    /// Log every executed line
    pub verbose: bool,
    /// File extensions picked up when scanning a directory
    pub extensions: Vec<String>,
    /// Command line of the program under test
    pub program: String,
    /// Command line used to step into a command; falls back to `program`
    pub debug_program: Option<String>,
    /// Prompt on the terminal before every `>`
    pub step_debug: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fixtures: PathBuf::from("src"),
            workdir_root: PathBuf::from("."),
            timeout: Some(DEFAULT_TIMEOUT),
            tolerance: 0,
            keep: false,
            verbose: false,
            extensions: vec![".in".into()],
            program: "staff-gitlet".into(),
            debug_program: None,
            step_debug: false,
        }
    }
}

/// Outcome of one script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every directive succeeded
    Passed,
    /// The program under test misbehaved at `line`
    Failed { reason: String, line: Option<LineId> },
    /// The script itself is defective
    Malformed { reason: String, line: Option<LineId> },
    /// The operator quit from step-debug mode
    Aborted,
}

impl Verdict {
    fn from_error(err: &ScriptError) -> Self {
        if err.is_quit() {
            Verdict::Aborted
        } else if err.is_malformed() {
            Verdict::Malformed { reason: err.message.clone(), line: err.line.clone() }
        } else {
            Verdict::Failed { reason: err.message.clone(), line: err.line.clone() }
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Line of the failing directive, if any
    pub fn line(&self) -> Option<&LineId> {
        match self {
            Verdict::Failed { line, .. } | Verdict::Malformed { line, .. } => line.as_ref(),
            _ => None,
        }
    }

    /// Short reason for a failed or malformed script
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Failed { reason, .. } | Verdict::Malformed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Console status: `OK`, `ERROR (..)` when the program misbehaved,
    /// `FAILED (..)` when the script itself is at fault.
    pub fn label(&self) -> String {
        match self {
            Verdict::Passed => "OK".to_string(),
            Verdict::Failed { reason, .. } => format!("ERROR ({})", reason),
            Verdict::Malformed { reason, .. } => format!("FAILED ({})", reason),
            Verdict::Aborted => "Exiting Debug mode ...".to_string(),
        }
    }
}

/// How many failing scripts get a full listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowLimit {
    Count(usize),
    All,
}

impl ShowLimit {
    /// A count, or `all` for no limit.
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(ShowLimit::All);
        }
        value.parse::<usize>()
            .map(ShowLimit::Count)
            .map_err(|_| format!("expected a number or 'all', got '{}'", value))
    }

    /// Use up one listing; `false` once the limit is exhausted.
    pub fn take(&mut self) -> bool {
        match self {
            ShowLimit::All => true,
            ShowLimit::Count(0) => false,
            ShowLimit::Count(left) => {
                *left -= 1;
                true
            }
        }
    }
}

/// Result of running all tests
#[derive(Debug)]
pub struct TestResult {
    /// Individual test case results
    pub cases: Vec<TestCaseResult>,
    /// Total duration
    pub duration: Duration,
}

impl TestResult {
    /// No script failed or was malformed
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0 && self.malformed_count() == 0
    }

    pub fn passed_count(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Passed))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Failed { .. }))
    }

    pub fn malformed_count(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Malformed { .. }))
    }

    pub fn aborted_count(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Aborted))
    }

    fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(&c.verdict)).count()
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        let mut line = format!("Ran {} tests. ", self.cases.len());
        if self.all_passed() && self.aborted_count() == 0 {
            line.push_str("All passed.");
        } else {
            line.push_str(&format!("{} passed.", self.passed_count()));
            if self.malformed_count() > 0 {
                line.push_str(&format!(" {} malformed.", self.malformed_count()));
            }
        }
        line.push_str(&format!(" ({}ms)", self.duration.as_millis()));
        line
    }
}

/// Result of a single test case
#[derive(Debug)]
pub struct TestCaseResult {
    /// Test name (filename without extension)
    pub name: String,
    /// Source file path
    pub file: PathBuf,
    pub verdict: Verdict,
    /// Execution log
    pub log: String,
    /// Files pulled in with `I`, in include order
    pub included: Vec<PathBuf>,
    /// Duration
    pub duration: Duration,
    /// Sandbox directory (if kept)
    pub workdir: Option<PathBuf>,
}

impl TestCaseResult {
    /// Numbered listing of the script and everything it included, headed by
    /// the failing line.
    pub fn details(&self) -> String {
        let base = self.file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());

        let mut out = String::new();
        if let Some(line) = self.verdict.line() {
            out.push_str(&format!("    Error on line {} of {}\n", line, base));
        }
        for path in std::iter::once(&self.file).chain(self.included.iter()) {
            out.push_str(&listing(path));
        }
        out
    }
}

/// `---- name ----` framed, line-numbered copy of a file.
fn listing(path: &Path) -> String {
    let name = path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let rule = "-".repeat(20);

    let mut out = format!("{} {} {}\n", rule, name, rule);
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let lines: Vec<&str> = text.lines().collect();
            let width = lines.len().to_string().len();
            for (i, line) in lines.iter().enumerate() {
                out.push_str(&format!("{:>width$}. {}\n", i + 1, line, width = width));
            }
        }
        Err(e) => out.push_str(&format!("<unreadable: {}>\n", e)),
    }
    out.push_str(&"-".repeat(42 + name.len()));
    out.push('\n');
    out
}

/// The test runner
pub struct TestRunner {
    engine: Engine,
    config: RunConfig,
    decisions: Option<Box<dyn DecisionSource>>,
}

impl TestRunner {
    /// Create a new runner around an executor
    pub fn new(config: RunConfig, executor: Box<dyn Executor>) -> Self {
        let mut engine = Engine::new(executor, config.fixtures.clone());
        engine.matcher = OutputMatcher::new(config.tolerance);
        engine.verbose = config.verbose;
        Self {
            engine,
            config,
            decisions: None,
        }
    }

    /// Ask `decisions` before every `>` (step-debug mode)
    pub fn set_decisions(&mut self, decisions: Box<dyn DecisionSource>) {
        self.decisions = Some(decisions);
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Expand the given paths into script files. Directories are scanned
    /// recursively; paths that do not exist are skipped.
    pub fn discover(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut found = Vec::new();
                self.scan_dir(path, &mut found)?;
                found.sort();
                files.extend(found);
            } else if path.is_file() {
                files.push(path.clone());
            } else {
                tracing::warn!(path = %path.display(), "skipping missing test file");
            }
        }
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                self.scan_dir(&path, files)?;
            } else if self.is_test_file(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_test_file(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.config.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
        } else {
            false
        }
    }

    /// Run every script found under `paths`, in order.
    pub fn run_all(&mut self, paths: &[PathBuf]) -> Result<TestResult, std::io::Error> {
        let start = Instant::now();
        let files = self.discover(paths)?;

        let mut cases = Vec::with_capacity(files.len());
        for file in &files {
            cases.push(self.evaluate(file));
        }

        Ok(TestResult {
            cases,
            duration: start.elapsed(),
        })
    }

    /// Run a single script in a fresh sandbox.
    pub fn evaluate(&mut self, file: &Path) -> TestCaseResult {
        let start = Instant::now();
        let name = file.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let sandbox = match SandboxDir::create(&self.config.workdir_root, &name, self.config.keep) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                return TestCaseResult {
                    name,
                    file: file.to_path_buf(),
                    verdict: Verdict::from_error(&e),
                    log: String::new(),
                    included: Vec::new(),
                    duration: start.elapsed(),
                    workdir: None,
                };
            }
        };
        tracing::debug!(test = %name, dir = %sandbox.path().display(), "testing directory");

        let workdir = absolute(sandbox.path());
        let mut state = State::new(workdir.clone(), self.config.timeout);
        let mut included = Vec::new();

        let outcome = LineSource::open(file).and_then(|mut source| {
            let decisions = self.decisions.as_deref_mut();
            let result = self.engine.execute(&mut state, &mut source, decisions);
            included = source.included_files().to_vec();
            result
        });

        let verdict = match outcome {
            Ok(()) => Verdict::Passed,
            Err(e) => {
                tracing::debug!(test = %name, error = %e, "script stopped");
                Verdict::from_error(&e)
            }
        };

        let kept = sandbox.is_kept().then_some(workdir);
        drop(sandbox);

        TestCaseResult {
            name,
            file: file.to_path_buf(),
            verdict,
            log: state.log,
            included,
            duration: start.elapsed(),
            workdir: kept,
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
    executor: Option<Box<dyn Executor>>,
    decisions: Option<Box<dyn DecisionSource>>,
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            executor: None,
            decisions: None,
        }
    }

    /// Run `program` (through the shell) for each `>`
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.config.program = program.into();
        self
    }

    pub fn debug_program(mut self, program: Option<String>) -> Self {
        self.config.debug_program = program;
        self
    }

    /// Prompt on stdin/stdout before every `>`
    pub fn step_debug(mut self, enabled: bool) -> Self {
        self.config.step_debug = enabled;
        self
    }

    /// Use a custom executor instead of running `program`
    pub fn executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn fixtures(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.fixtures = dir.into();
        self
    }

    pub fn workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workdir_root = root.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn tolerance(mut self, tolerance: usize) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Keep sandbox directories after tests
    pub fn keep(mut self, keep: bool) -> Self {
        self.config.keep = keep;
        self
    }

    /// Enable verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Set file extensions to scan
    pub fn extensions(mut self, exts: Vec<String>) -> Self {
        self.config.extensions = exts;
        self
    }

    /// Step-debug mode with a custom decision source
    pub fn decisions(mut self, decisions: Box<dyn DecisionSource>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    /// Build and return the runner.
    pub fn build(self) -> TestRunner {
        let config = self.config;
        let executor = self.executor.unwrap_or_else(|| {
            let mut exec = ProgramExecutor::new(config.program.clone());
            if let Some(ref debug_program) = config.debug_program {
                exec = exec.with_debug_program(debug_program.clone());
            }
            Box::new(exec)
        });
        let decisions = self.decisions.or_else(|| {
            config.step_debug.then(|| {
                Box::new(ConsoleDecisions::stdio(config.program.clone())) as Box<dyn DecisionSource>
            })
        });

        let mut runner = TestRunner::new(config, executor);
        if let Some(decisions) = decisions {
            runner.set_decisions(decisions);
        }
        runner
    }
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run scripts and integrate with `#[test]` by panicking on failure.
///
/// Usage in cargo tests:
/// ```rust,ignore
/// #[test]
/// fn gitlet_scripts() {
///     emx_blackbox::run_and_assert(
///         emx_blackbox::TestRunnerBuilder::new().program("staff-gitlet"),
///         &["tests/samples".into()],
///     );
/// }
/// ```
pub fn run_and_assert(builder: TestRunnerBuilder, paths: &[PathBuf]) {
    let builder = builder
        .verbose(std::env::var("BLACKBOX_VERBOSE").is_ok())
        .keep(std::env::var("BLACKBOX_KEEP").is_ok());
    let mut runner = builder.build();
    let result = runner.run_all(paths).expect("failed to run tests");

    for case in &result.cases {
        match &case.verdict {
            Verdict::Passed => eprintln!("PASS  {} ({}ms)", case.name, case.duration.as_millis()),
            Verdict::Aborted => eprintln!("QUIT  {}", case.name),
            verdict => {
                let tag = if matches!(verdict, Verdict::Malformed { .. }) { "BAD " } else { "FAIL" };
                eprintln!("{}  {}: {}", tag, case.name, verdict.reason().unwrap_or(""));
                eprint!("{}", case.details());
                for line in case.log.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!("{} test(s) failed, {} malformed", result.failed_count(), result.malformed_count());
    }
}
