//! Integration test: run `.in` scripts end to end against a small shell
//! program standing in for the program under test.
//!
//! Usage:
//!   cargo test --test integration
//!   BLACKBOX_VERBOSE=1 cargo test --test integration   # print execution logs
//!   BLACKBOX_KEEP=1 cargo test --test integration      # keep sandbox dirs
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;
use emx_blackbox::{TestRunnerBuilder, Verdict};

const FAKE_PROGRAM: &str = r#"
case "$1" in
    echo) shift; echo "$@" ;;
    touch) touch "$2" ;;
    show) cat "$2" ;;
    commit) echo "commit 5f3a9c"; echo "Date: today" ;;
    fail) echo "fatal: no"; exit 3 ;;
    sleep) sleep "$2" ;;
    complain) echo "warning" >&2 ;;
esac
"#;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["scripts", "src", "runs"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("prog.sh"), FAKE_PROGRAM).unwrap();
        std::fs::write(dir.path().join("src/wug.txt"), "This is a wug.\n").unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, text: &str) -> PathBuf {
        let path = self.path().join("scripts").join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn builder(&self) -> TestRunnerBuilder {
        TestRunnerBuilder::new()
            .program(format!("sh {}", self.path().join("prog.sh").display()))
            .fixtures(self.path().join("src"))
            .workdir_root(self.path().join("runs"))
    }

    fn runs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path().join("runs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[test]
fn test_full_script_passes() {
    let ws = Workspace::new();
    ws.script("prelude.inc", "+ wug.txt wug.txt\nE wug.txt\n");
    let script = ws.script("basic.in", "\
# stage a fixture and inspect it
I prelude.inc
> show wug.txt
This is a wug.
<<<
> commit
commit ([0-9a-f]+)
Date: .*
<<<*
D HASH \"${1}\"
> echo ${HASH}
5f3a9c
<<<
> complain
warning
<<<
C remote
+ copy.txt wug.txt
= copy.txt wug.txt
C
* copy.txt
- wug.txt
* wug.txt
");

    let mut runner = ws.builder().build();
    let case = runner.evaluate(&script);
    assert_eq!(case.verdict, Verdict::Passed, "log:\n{}", case.log);
    assert_eq!(case.included.len(), 1);
    assert!(ws.runs().is_empty(), "sandbox should be removed");
}

#[test]
fn test_mismatch_reports_run_line() {
    let ws = Workspace::new();
    let script = ws.script("mismatch.in", "# header\n> echo hello\ngoodbye\n<<<\n> echo never\n<<<\n");

    let mut runner = ws.builder().build();
    let case = runner.evaluate(&script);
    match &case.verdict {
        Verdict::Failed { reason, line } => {
            assert_eq!(reason, "incorrect output");
            assert_eq!(line.as_ref().unwrap().to_string(), "2");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(case.log.contains("-goodbye"));
    assert!(case.log.contains("+hello"));
    assert!(case.details().starts_with("    Error on line 2 of mismatch.in\n"));
}

#[test]
fn test_failure_inside_include_cites_nested_line() {
    let ws = Workspace::new();
    ws.script("setup.inc", "# shared setup\n> fail\n<<<\n");
    let script = ws.script("nested.in", "+ wug.txt wug.txt\nI setup.inc\n");

    let mut runner = ws.builder().build();
    let case = runner.evaluate(&script);
    assert!(matches!(case.verdict, Verdict::Failed { .. }));
    assert_eq!(case.verdict.line().unwrap().to_string(), "2.2");
    assert!(case.verdict.reason().unwrap().contains("code 3"));

    let details = case.details();
    assert!(details.contains(" nested.in "));
    assert!(details.contains(" setup.inc "));
}

#[test]
fn test_unterminated_block_is_malformed() {
    let ws = Workspace::new();
    let script = ws.script("broken.in", "> echo hi\nhi\n");

    let mut runner = ws.builder().build();
    let case = runner.evaluate(&script);
    assert!(matches!(case.verdict, Verdict::Malformed { .. }), "{:?}", case.verdict);
}

#[test]
fn test_timeout_directive() {
    let ws = Workspace::new();
    let script = ws.script("slow.in", "T 0.2\n> sleep 5\n<<<\n");

    let mut runner = ws.builder().build();
    let start = std::time::Instant::now();
    let case = runner.evaluate(&script);
    assert_eq!(case.verdict.reason(), Some("timeout"));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_keep_preserves_sandbox() {
    let ws = Workspace::new();
    let script = ws.script("kept.in", "+ wug.txt wug.txt\n");

    let mut runner = ws.builder().keep(true).build();
    let first = runner.evaluate(&script);
    let second = runner.evaluate(&script);
    assert!(first.verdict.is_passed());
    assert!(second.verdict.is_passed());
    assert_eq!(ws.runs(), vec!["kept_0", "kept_1"]);
    assert!(first.workdir.unwrap().join("wug.txt").is_file());
}

#[test]
fn test_run_all_counts() {
    let ws = Workspace::new();
    ws.script("a.in", "> echo a\na\n<<<\n");
    ws.script("b.in", "> echo b\nnot b\n<<<\n");
    ws.script("c.in", "bogus\n");
    ws.script("helper.inc", "> echo skipped\n<<<\n");

    let mut runner = ws.builder().build();
    let result = runner.run_all(&[
        ws.path().join("scripts"),
        ws.path().join("missing.in"),
    ]).unwrap();

    let names: Vec<_> = result.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(result.passed_count(), 1);
    assert_eq!(result.failed_count(), 1);
    assert_eq!(result.malformed_count(), 1);
    assert!(!result.all_passed());
    assert!(result.summary().starts_with("Ran 3 tests. 1 passed."));
}

#[test]
fn test_run_and_assert_passing_scripts() {
    let ws = Workspace::new();
    ws.script("ok.in", "> echo fine\nfine\n<<<\n");
    emx_blackbox::run_and_assert(ws.builder(), &[ws.path().join("scripts")]);
}
