//! Script engine
//!
//! The Engine holds per-run configuration (program executor, output
//! matcher, fixture directory). It is stateless otherwise: one engine can
//! run many scripts, each with its own [`State`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ErrorKind, ScriptError};
use crate::matcher::{render_diff, OutputMatcher};
use crate::parser::{parse_block_end, parse_line, Directive};
use crate::sandbox::{DecisionSource, ExecOutcome, Executor, StepDecision};
use crate::source::{LineId, LineSource};
use crate::state::State;

/// A `>` directive together with its expected-output block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunBlock {
    /// Arguments passed to the program
    pub command: String,
    /// Expected lines, substituted and right-trimmed
    pub expected: Vec<String>,
    /// Closed with `<<<*`
    pub is_regexp: bool,
    /// Line of the `>`
    pub id: LineId,
}

/// The script engine
pub struct Engine {
    /// Runs the program under test
    pub executor: Box<dyn Executor>,
    /// Judges program output
    pub matcher: OutputMatcher,
    /// Where `+` and `=` find their fixtures
    pub fixtures: PathBuf,
    /// Log every executed line
    pub verbose: bool,
}

impl Engine {
    pub fn new(executor: Box<dyn Executor>, fixtures: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            matcher: OutputMatcher::default(),
            fixtures: fixtures.into(),
            verbose: false,
        }
    }

    /// Execute a script until it ends or the first failing directive.
    ///
    /// With `decisions` set, the operator is asked before each `>`
    /// (step-debug mode); quitting surfaces as an [`ErrorKind::UserQuit`]
    /// error.
    pub fn execute(
        &self,
        state: &mut State,
        source: &mut LineSource,
        mut decisions: Option<&mut (dyn DecisionSource + '_)>,
    ) -> Result<(), ScriptError> {
        while let Some((id, raw)) = source.next_line()? {
            let file = source.current_file().to_path_buf();
            let filename = file.display().to_string();

            let line = state.substitute(&raw)
                .map_err(|e| e.with_location(&filename, id.clone()))?;

            if self.verbose {
                state.logf(&format!("+ {}", line.trim_end()));
            }

            let parsed = parse_line(&line, &id)
                .map_err(|e| e.with_location(&filename, id.clone()))?;

            let result = match parsed.directive {
                Directive::Comment => Ok(()),
                Directive::Include(path) => {
                    let base = file.parent().unwrap_or_else(|| Path::new(""));
                    source.include(base.join(path), &id)
                }
                Directive::ChangeDir(name) => state.chdir(&name).map_err(|e| {
                    ScriptError::new(ErrorKind::Io, format!("cannot switch to {}: {}", name, e))
                }),
                Directive::SetTimeout(value) => {
                    self.set_timeout(state, &value);
                    Ok(())
                }
                Directive::Copy { dest, src } => self.copy_fixture(state, &dest, &src),
                Directive::Delete(name) => {
                    delete_file(&state.resolve_path(&name));
                    Ok(())
                }
                Directive::Run(command) => read_block(state, source, command, &id, &filename)
                    .and_then(|block| self.run_block(state, &block, decisions.as_deref_mut())),
                Directive::CheckFileContent { name, expected } => {
                    self.check_file_content(state, &name, &expected)
                }
                Directive::CheckAbsent(name) => {
                    if state.resolve_path(&name).exists() {
                        Err(ScriptError::new(ErrorKind::FileExists,
                            format!("file {} present", name)))
                    } else {
                        Ok(())
                    }
                }
                Directive::CheckPresent(name) => {
                    if state.resolve_path(&name).exists() {
                        Ok(())
                    } else {
                        Err(ScriptError::new(ErrorKind::FileMissing,
                            format!("file or directory {} not present", name)))
                    }
                }
                Directive::Define { name, value } => {
                    state.define(name, value);
                    Ok(())
                }
            };

            result.map_err(|e| e.or_location(&filename, &id))?;
        }

        Ok(())
    }

    /// `T secs`: a value that is not a usable number of seconds is logged
    /// and otherwise ignored.
    fn set_timeout(&self, state: &mut State, value: &str) {
        match value.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
            Some(timeout) => state.timeout = Some(timeout),
            None => {
                tracing::warn!(value, "ignoring bad timeout");
                state.logf(&format!("[bad time: {}]", value));
            }
        }
    }

    fn copy_fixture(&self, state: &State, dest: &str, src: &str) -> Result<(), ScriptError> {
        let target = state.resolve_path(dest);
        delete_file(&target);
        std::fs::copy(self.fixtures.join(src), &target).map_err(|e| {
            ScriptError::new(ErrorKind::CopyFailed,
                format!("file {} could not be copied to {}: {}", src, dest, e))
        })?;
        Ok(())
    }

    fn check_file_content(&self, state: &State, name: &str, expected: &str) -> Result<(), ScriptError> {
        let actual = read_canonical(&state.resolve_path(name));
        let wanted = read_canonical(&self.fixtures.join(expected));
        if actual != wanted {
            return Err(ScriptError::new(ErrorKind::ComparisonFailed,
                format!("file {} has incorrect content", name)));
        }
        Ok(())
    }

    /// Run the program for one `>` block and judge its output.
    pub fn run_block(
        &self,
        state: &mut State,
        block: &RunBlock,
        decisions: Option<&mut (dyn DecisionSource + '_)>,
    ) -> Result<(), ScriptError> {
        let decision = match decisions {
            Some(d) => d.decide(&block.command),
            None => StepDecision::Next,
        };

        let outcome = match decision {
            StepDecision::Next => self.executor.invoke(&block.command, &state.pwd, state.timeout),
            StepDecision::StepInto => self.executor.invoke_debug(&block.command, &state.pwd),
            StepDecision::Quit => return Err(ScriptError::quit()),
        };

        let output = match outcome {
            ExecOutcome::Ok(output) => output,
            ExecOutcome::NonZeroExit { code, output } => {
                log_output(state, &output);
                let status = code.map_or_else(|| "a signal".to_string(), |c| format!("code {}", c));
                return Err(ScriptError::new(ErrorKind::NonZeroExit,
                    format!("program exited with {}", status)));
            }
            ExecOutcome::Timeout => {
                return Err(ScriptError::new(ErrorKind::Timeout, "timeout"));
            }
            ExecOutcome::SpawnFailed(msg) => {
                return Err(ScriptError::new(ErrorKind::CommandFailed, msg));
            }
        };
        log_output(state, &output);

        let checked = match self.matcher.check(&block.expected, &output, block.is_regexp) {
            Ok(checked) => checked,
            Err(e) => {
                state.groups = vec![output];
                return Err(e);
            }
        };
        state.groups = checked.groups;

        if !checked.matched {
            state.logf(&render_diff(&block.expected, &output));
            return Err(ScriptError::new(ErrorKind::Mismatch, "incorrect output"));
        }
        Ok(())
    }
}

/// Read the expected-output block that follows a `>` line, up to and
/// including its `<<<` terminator.
pub fn read_block(
    state: &State,
    source: &mut LineSource,
    command: String,
    id: &LineId,
    filename: &str,
) -> Result<RunBlock, ScriptError> {
    let mut expected = Vec::new();
    loop {
        let Some((line_id, raw)) = source.next_line()? else {
            return Err(ScriptError::new(ErrorKind::Unterminated,
                format!("unterminated command: > {}", command))
                .with_location(filename, id.clone()));
        };
        let line = raw.trim_end();
        if let Some(is_regexp) = parse_block_end(line) {
            return Ok(RunBlock {
                command,
                expected,
                is_regexp,
                id: id.clone(),
            });
        }
        let line = state.expand(line).map_err(|e| {
            e.with_location(source.current_file().display().to_string(), line_id)
        })?;
        expected.push(line);
    }
}

/// Program output goes to the log with each line prefixed by `- `.
fn log_output(state: &mut State, output: &str) {
    if output.is_empty() {
        return;
    }
    let shown: Vec<String> = output.lines().map(|l| format!("- {}", l)).collect();
    state.logf(&shown.join("\n"));
}

/// Best-effort removal; a missing file is not an error.
fn delete_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "delete failed");
        }
    }
}

/// File contents with carriage returns removed; `None` if unreadable.
fn read_canonical(path: &Path) -> Option<Vec<u8>> {
    let mut data = std::fs::read(path).ok()?;
    data.retain(|&b| b != b'\r');
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays canned outcomes and records what was invoked.
    #[derive(Clone, Default)]
    struct FakeExecutor {
        outcomes: Rc<RefCell<VecDeque<ExecOutcome>>>,
        calls: Rc<RefCell<Vec<(String, bool)>>>,
    }

    impl FakeExecutor {
        fn with(outcomes: Vec<ExecOutcome>) -> Self {
            let fake = Self::default();
            fake.outcomes.borrow_mut().extend(outcomes);
            fake
        }

        fn next(&self, args: &str, debug: bool) -> ExecOutcome {
            self.calls.borrow_mut().push((args.to_string(), debug));
            self.outcomes.borrow_mut().pop_front().unwrap_or(ExecOutcome::Ok(String::new()))
        }
    }

    impl Executor for FakeExecutor {
        fn invoke(&self, args: &str, _dir: &Path, _timeout: Option<Duration>) -> ExecOutcome {
            self.next(args, false)
        }

        fn invoke_debug(&self, args: &str, _dir: &Path) -> ExecOutcome {
            self.next(args, true)
        }
    }

    struct Scripted(VecDeque<StepDecision>);

    impl DecisionSource for Scripted {
        fn decide(&mut self, _command: &str) -> StepDecision {
            self.0.pop_front().unwrap_or(StepDecision::Quit)
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        sandbox: PathBuf,
        fixtures: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let sandbox = dir.path().join("sandbox");
            let fixtures = dir.path().join("src");
            std::fs::create_dir(&sandbox).unwrap();
            std::fs::create_dir(&fixtures).unwrap();
            std::fs::write(fixtures.join("wug.txt"), "This is a wug.\n").unwrap();
            std::fs::write(fixtures.join("wug_crlf.txt"), "This is a wug.\r\n").unwrap();
            Self { dir, sandbox, fixtures }
        }

        fn script(&self, name: &str, text: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        }

        fn run(&self, fake: &FakeExecutor, text: &str) -> (Result<(), ScriptError>, State) {
            self.run_with(fake, text, None)
        }

        fn run_with(
            &self,
            fake: &FakeExecutor,
            text: &str,
            decisions: Option<&mut (dyn DecisionSource + '_)>,
        ) -> (Result<(), ScriptError>, State) {
            let engine = Engine::new(Box::new(fake.clone()), &self.fixtures);
            let path = self.script("t.in", text);
            let mut state = State::new(self.sandbox.clone(), Some(Duration::from_secs(10)));
            let mut source = LineSource::open(&path).unwrap();
            let result = engine.execute(&mut state, &mut source, decisions);
            (result, state)
        }
    }

    #[test]
    fn test_run_literal_pass() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::Ok("hello\n".into())]);
        let (result, state) = fx.run(&fake, "> greet\nhello\n<<<\n");
        result.unwrap();
        assert_eq!(fake.calls.borrow().as_slice(), &[("greet".to_string(), false)]);
        assert_eq!(state.groups, vec!["hello\n".to_string()]);
    }

    #[test]
    fn test_run_literal_mismatch_cites_run_line() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::Ok("hellp\n".into())]);
        let (result, state) = fx.run(&fake, "# header\n> greet\nhello\n<<<\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Mismatch);
        assert_eq!(err.line.unwrap().to_string(), "2");
        assert!(state.log.contains("+hellp"));
    }

    #[test]
    fn test_run_regexp_groups_feed_later_lines() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![
            ExecOutcome::Ok("foobar\n".into()),
            ExecOutcome::Ok("checked out\n".into()),
        ]);
        let (result, _) = fx.run(&fake, "> log\nfoo.*\n<<<*\n> checkout ${0}\nchecked out\n<<<\n");
        result.unwrap();
        assert_eq!(fake.calls.borrow()[1].0, "checkout foobar");
    }

    #[test]
    fn test_expected_lines_are_substituted() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::Ok("# on branch main\n".into())]);
        let (result, _) = fx.run(&fake, "D B \"main\"\n> status\n# on branch ${B}\n<<<\n");
        result.unwrap();
    }

    #[test]
    fn test_define_chain() {
        let fx = Fixture::new();
        let fake = FakeExecutor::default();
        let (result, state) = fx.run(&fake, "D A \"x\"\nD B \"${A}y\"\n");
        result.unwrap();
        assert_eq!(state.var("B"), Some("xy"));
    }

    #[test]
    fn test_unterminated_block_is_malformed() {
        let fx = Fixture::new();
        let fake = FakeExecutor::default();
        let (result, _) = fx.run(&fake, "> init\nexpected\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert!(err.is_malformed());
        assert_eq!(err.line.unwrap().to_string(), "1");
        assert!(fake.calls.borrow().is_empty());
    }

    #[test]
    fn test_unknown_directive_is_malformed() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "# ok\nbogus line\n");
        let err = result.unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(err.line.unwrap().to_string(), "2");
    }

    #[test]
    fn test_non_zero_exit_and_timeout_fail() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::NonZeroExit {
            code: Some(1),
            output: "boom\n".into(),
        }]);
        let (result, state) = fx.run(&fake, "> crash\n<<<\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NonZeroExit);
        assert!(err.message.contains("code 1"));
        assert!(state.log.contains("- boom"));

        let fake = FakeExecutor::with(vec![ExecOutcome::Timeout]);
        let (result, _) = fx.run(&fake, "> hang\n<<<\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_fail_fast() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::Ok("wrong\n".into())]);
        let (result, _) = fx.run(&fake, "> one\nright\n<<<\n> two\n<<<\n");
        assert!(result.is_err());
        assert_eq!(fake.calls.borrow().len(), 1);
    }

    #[test]
    fn test_copy_and_checks() {
        let fx = Fixture::new();
        let fake = FakeExecutor::default();
        let script = "* wug.txt\n+ wug.txt wug.txt\nE wug.txt\n= wug.txt wug_crlf.txt\n- wug.txt\n* wug.txt\n";
        let (result, _) = fx.run(&fake, script);
        result.unwrap();
    }

    #[test]
    fn test_check_absent_fails_after_copy() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "+ f.txt wug.txt\n* f.txt\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileExists);
        assert_eq!(err.line.unwrap().to_string(), "2");
    }

    #[test]
    fn test_copy_missing_fixture() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "+ f.txt nope.txt\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::CopyFailed);
    }

    #[test]
    fn test_file_content_missing_side() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "= never.txt wug.txt\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::ComparisonFailed);
    }

    #[test]
    fn test_check_present_directory() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "C D1\nC\nE D1\nE D2\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileMissing);
        assert_eq!(err.line.unwrap().to_string(), "4");
    }

    #[test]
    fn test_change_dir_scopes_files() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "C remote\n+ f.txt wug.txt\nC\n* f.txt\n");
        result.unwrap();
        assert!(fx.sandbox.join("remote/f.txt").is_file());
    }

    #[test]
    fn test_set_timeout() {
        let fx = Fixture::new();
        let (result, state) = fx.run(&FakeExecutor::default(), "T 2.5\nT soon\n");
        result.unwrap();
        assert_eq!(state.timeout, Some(Duration::from_millis(2500)));
        assert!(state.log.contains("bad time: soon"));
    }

    #[test]
    fn test_undefined_substitution_fails() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "# ${SKIPPED}\n> log ${NOPE}\n<<<\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
        assert!(!err.is_malformed());
        assert_eq!(err.line.unwrap().to_string(), "2");
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let fx = Fixture::new();
        let inc_dir = fx.dir.path().join("inc");
        std::fs::create_dir(&inc_dir).unwrap();
        std::fs::write(inc_dir.join("outer.inc"), "I inner.inc\n").unwrap();
        std::fs::write(inc_dir.join("inner.inc"), "D X \"deep\"\n* ${UNSET}\n").unwrap();

        let (result, state) = fx.run(&FakeExecutor::default(), "# top\nI inc/outer.inc\n");
        let err = result.unwrap_err();
        assert_eq!(state.var("X"), Some("deep"));
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
        assert_eq!(err.line.unwrap().to_string(), "2.1.2");
        assert!(err.file.unwrap().ends_with("inner.inc"));
    }

    #[test]
    fn test_missing_include_is_malformed() {
        let fx = Fixture::new();
        let (result, _) = fx.run(&FakeExecutor::default(), "I missing.inc\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileNotFound);
        assert!(err.is_malformed());
    }

    #[test]
    fn test_step_debug_decisions() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![
            ExecOutcome::Ok(String::new()),
            ExecOutcome::Ok(String::new()),
        ]);
        let mut decisions = Scripted(VecDeque::from(vec![
            StepDecision::Next,
            StepDecision::StepInto,
            StepDecision::Quit,
        ]));
        let (result, _) = fx.run_with(
            &fake,
            "> a\n<<<\n> b\n<<<\n> c\n<<<\n> d\n<<<\n",
            Some(&mut decisions),
        );
        assert!(result.unwrap_err().is_quit());
        assert_eq!(fake.calls.borrow().as_slice(), &[
            ("a".to_string(), false),
            ("b".to_string(), true),
        ]);
    }

    #[test]
    fn test_bad_pattern() {
        let fx = Fixture::new();
        let fake = FakeExecutor::with(vec![ExecOutcome::Ok("x\n".into())]);
        let (result, state) = fx.run(&fake, "> log\n(unclosed\n<<<*\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::BadPattern);
        assert_eq!(state.groups, vec!["x\n".to_string()]);
    }
}
