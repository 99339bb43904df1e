//! Runs JSON-Schema-Test-Suite shaped fixture files against the compiler.
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;

use json_schemac::{Options, SchemaRegistry, path_de};

/// run fixture suites: `[{description, schema, tests: [{description, data, valid}]}]`
#[derive(Parser, Debug)]
struct Cli {
    /// fixture files or quoted glob patterns
    #[arg(num_args = 1.., default_value = "dev-test-runner/fixtures/*.json")]
    fixtures: Vec<String>,

    /// JSON options file applied to every case
    #[arg(long)]
    config: Option<PathBuf>,

    /// also run every case in all-errors mode
    #[arg(long)]
    all_errors: bool,

    /// print passing tests too
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct Case {
    description: String,
    schema: Value,
    tests: Vec<Test>,
}

#[derive(Debug, Deserialize)]
struct Test {
    description: String,
    data: Value,
    valid: bool,
}

#[derive(Default)]
struct Tally {
    passed: usize,
    failed: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let base = match cli.config.as_ref() {
        Some(path) => Options::from_json_file(path)?,
        None => Options::default(),
    };
    let mut modes = vec![("fail-fast", base.clone())];
    if cli.all_errors {
        modes.push(("all-errors", Options { all_errors: true, ..base }));
    }

    let mut tally = Tally::default();
    for path in fixture_paths(&cli.fixtures)? {
        let cases: Vec<Case> = path_de::from_file(&path)?;
        println!("{}", path.display().to_string().bold());
        for (mode, opts) in &modes {
            for case in &cases {
                run_case(case, mode, opts, cli.verbose, &mut tally);
            }
        }
    }

    let summary = format!("{} passed, {} failed", tally.passed, tally.failed);
    if tally.failed == 0 {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
    Ok(tally.failed == 0)
}

fn run_case(case: &Case, mode: &str, opts: &Options, verbose: bool, tally: &mut Tally) {
    let mut registry = SchemaRegistry::with_options(opts.clone());
    let validator = match registry.compile(case.schema.clone()) {
        Ok(v) => v,
        Err(error) => {
            tally.failed += case.tests.len();
            println!("  {} [{mode}] {}: {error}", "COMPILE".red().bold(), case.description);
            return;
        }
    };
    for test in &case.tests {
        let label = format!("[{mode}] {} / {}", case.description, test.description);
        match validator.validate(&test.data) {
            Ok(outcome) if outcome.valid == test.valid => {
                tally.passed += 1;
                if verbose {
                    println!("  {} {label}", "ok".green());
                }
            }
            Ok(outcome) => {
                tally.failed += 1;
                let expected = if test.valid { "valid" } else { "invalid" };
                println!("  {} {label}: expected {expected}", "FAIL".red().bold());
                for error in &outcome.errors {
                    println!("      {}", error.to_string().dimmed());
                }
            }
            Err(error) => {
                tally.failed += 1;
                println!("  {} {label}: {error}", "ERROR".red().bold());
            }
        }
    }
}

fn fixture_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for pattern in patterns {
        let before = out.len();
        for entry in glob::glob(pattern).with_context(|| format!("bad pattern {pattern}"))? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("no fixtures matched {pattern}");
        }
    }
    Ok(out)
}
