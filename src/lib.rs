//! emx-blackbox: A black-box test driver for command-line programs
//!
//! Runs a program under test against `.in` scripts, one sandbox directory
//! per script, and reports a verdict for each.
//!
//! # Overview
//!
//! A script is a sequence of one-line directives. `>` runs the program with
//! the rest of the line as its arguments and compares everything it printed
//! against the block of lines that follows, up to a `<<<` terminator.
//! Other directives stage fixture files, check the sandbox contents, define
//! variables, and pull in shared script fragments.
//!
//! # Script Syntax
//!
//! ```text
//! # Set up a repository and commit one file
//! I prelude.inc
//! + wug.txt wug.txt
//! > add wug.txt
//! <<<
//! > log
//! ===
//! commit ([a-f0-9]+)
//! [\s\S]*
//! <<<*
//! D UID "${1}"
//! > checkout ${UID} -- wug.txt
//! <<<
//! = wug.txt wug.txt
//! ```
//!
//! # Directives
//!
//! | Directive | Description |
//! |-----------|-------------|
//! | `# ...` | Comment |
//! | `I file` | Include another script (path relative to the including file) |
//! | `C [dir]` | Switch to a subdirectory of the sandbox (none = sandbox root) |
//! | `T secs` | Set the per-command timeout |
//! | `+ name src` | Copy fixture `src` to `name` |
//! | `- name` | Delete `name` |
//! | `> args` | Run the program; block ends with `<<<` (literal) or `<<<*` (regex) |
//! | `= name src` | `name` must have the same content as fixture `src` |
//! | `* name` | `name` must not exist |
//! | `E name` | `name` must exist |
//! | `D var "value"` | Define `${var}` |
//!
//! # Substitution
//!
//! `${var}` expands a definition; `${N}` expands capture group N of the last
//! `>` block (`${0}` is the whole output). Comment lines are not expanded.

mod engine;
mod state;
mod parser;
mod source;
mod subst;
mod matcher;
mod sandbox;
mod runner;
mod error;

pub use engine::{Engine, RunBlock, read_block};
pub use state::State;
pub use parser::{Directive, ScriptLine, parse_line, parse_block_end};
pub use source::{LineId, LineSource};
pub use subst::{substitute, expand, is_comment, MAX_PASSES};
pub use matcher::{OutputMatcher, MatchOutcome, normalize, edit_distance, render_diff};
pub use sandbox::{
    Executor, ProgramExecutor, ExecOutcome, DecisionSource, StepDecision, ConsoleDecisions,
    SandboxDir, create_isolated_dir, release_dir, DEBUG_BANNER, MAX_DIR_ATTEMPTS,
};
pub use runner::{
    TestRunner, RunConfig, TestResult, TestCaseResult, Verdict, ShowLimit, TestRunnerBuilder,
    DEFAULT_TIMEOUT,
};
pub use error::{ScriptError, ErrorKind};

// Convenience function for cargo test integration
pub use runner::run_and_assert;
