//! emx-blackbox CLI
//!
//! Run a program under test against `.in` scripts.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use emx_blackbox::{ShowLimit, TestCaseResult, TestRunnerBuilder, Verdict, DEBUG_BANNER};

/// Timeout used in step-debug mode, where the operator sits in a debugger.
const DEBUG_TIMEOUT: Duration = Duration::from_secs(100_000);

#[derive(Parser, Debug)]
#[command(name = "emx-blackbox")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Run black-box test scripts against a command-line program")]
struct Cli {
    /// Script files or directories to scan
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Program under test; script arguments are appended to it
    #[arg(long, default_value = "staff-gitlet")]
    program: String,

    /// Program used when stepping into a command in debug mode
    #[arg(long = "debug-program")]
    debug_program: Option<String>,

    /// Directory holding fixture files
    #[arg(long = "src", default_value = "src")]
    src: PathBuf,

    /// Directory the per-test sandboxes are created in
    #[arg(long = "workdir", default_value = ".")]
    workdir: PathBuf,

    /// Seconds each command may run
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Edit distance tolerated in literal output comparisons
    #[arg(long, default_value_t = 0)]
    tolerance: usize,

    /// Keep sandbox directories after each test
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// Verbose output: show every executed line and the program output
    #[arg(short, long)]
    verbose: bool,

    /// Show script listings for up to N failing tests ("all" for no limit)
    #[arg(long, value_parser = ShowLimit::parse)]
    show: Option<ShowLimit>,

    /// Step through each command interactively
    #[arg(long)]
    debug: bool,

    /// File extensions to match when scanning directories
    #[arg(long = "ext", default_value = ".in")]
    extensions: Vec<String>,

    /// Log level for diagnostics (overridden by RUST_LOG)
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let timeout = if cli.debug {
        DEBUG_TIMEOUT
    } else {
        Duration::try_from_secs_f64(cli.timeout)
            .map_err(|e| anyhow::anyhow!("invalid --timeout {}: {}", cli.timeout, e))?
    };

    let builder = TestRunnerBuilder::new()
        .program(cli.program.clone())
        .debug_program(cli.debug_program.clone())
        .step_debug(cli.debug)
        .fixtures(cli.src.clone())
        .workdir_root(cli.workdir.clone())
        .timeout(Some(timeout))
        .tolerance(cli.tolerance)
        .keep(cli.keep)
        .verbose(cli.verbose)
        .extensions(cli.extensions.clone());

    if cli.debug {
        print!("{}", DEBUG_BANNER);
    }

    let mut runner = builder.build();
    let result = runner.run_all(&cli.paths)?;

    // Without --show no listings are printed at all
    let mut budget = cli.show;
    for case in &result.cases {
        print_case(case, cli.verbose);

        if case.verdict.is_passed() || case.verdict == Verdict::Aborted {
            continue;
        }
        if let Some(ref mut limit) = budget {
            if limit.take() {
                print!("{}", case.details());
            } else {
                println!("   Limit on error details exceeded.");
            }
        }
    }

    println!();
    println!("{}", result.summary());

    if result.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_case(case: &TestCaseResult, verbose: bool) {
    let base = case.file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| case.name.clone());
    println!("{}:", base);

    println!("{}", case.verdict.label());

    if !case.log.is_empty() && (verbose || !case.verdict.is_passed()) {
        for line in case.log.lines() {
            println!("    {}", line);
        }
    }
    if let Some(ref wd) = case.workdir {
        println!("    workdir: {}", wd.display());
    }
}
