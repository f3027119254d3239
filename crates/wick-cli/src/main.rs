//! wick CLI entry point.
//!
//! Usage:
//!   wick [OPTIONS] <TEMPLATE> < targets.txt
//!   wick -i targets.txt -m 'ext:url|clc:whois' 'curl -s {STRING}'
//!   wick --list-modules

mod cli;

use std::io::{self, BufRead, BufReader};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use wick_kernel::context::http_client;
use wick_kernel::{Batch, BatchSummary, FunctionRegistry, ModuleRegistry, RunConfig, RunContext};

use crate::cli::Cli;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wick={0},wick_kernel={0}", cli.log_level())));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load_from(path)?,
        None => RunConfig::load().context("Failed to load configuration")?,
    };
    cli.apply(&mut config).context("Invalid arguments")?;

    if cli.list_modules {
        list_modules(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.list_functions {
        list_functions(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let template = cli.template.clone().context("a command template is required")?;
    let targets = read_targets(&cli)?;
    tracing::debug!("{} targets loaded", targets.len());

    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let summary = rt.block_on(run_batch(&config, &template, targets))?;

    print_summary(&summary);
    if summary.scheduler.cancelled {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_batch(config: &RunConfig, template: &str, targets: Vec<String>) -> Result<BatchSummary> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping workers");
            interrupt.cancel();
        }
    });

    let run = RunContext::from_config(config, cancel)
        .context("Failed to open output files")?;
    let batch = Batch::new(config, template, Arc::new(run))?;
    Ok(batch.run(targets).await)
}

/// Non-blank lines from `--input` or stdin, trailing whitespace trimmed.
fn read_targets(cli: &Cli) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open input: {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };
    collect_targets(reader).context("Failed to read targets")
}

fn collect_targets(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut targets = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if !line.trim().is_empty() {
            targets.push(line.to_string());
        }
    }
    Ok(targets)
}

fn list_modules(config: &RunConfig) -> Result<()> {
    let modules = ModuleRegistry::with_builtins(http_client(config)?);
    for meta in modules.list() {
        println!("{:<14} {:<10} {}", meta.spec(), meta.kind, meta.description);
    }
    Ok(())
}

fn list_functions(config: &RunConfig) -> Result<()> {
    let functions = FunctionRegistry::with_builtins(http_client(config)?);
    for (name, description) in functions.list() {
        println!("{:<10} {}", name, description);
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    let t = &summary.targets;
    eprintln!(
        "\n{} done, {} filtered, {} skipped, {} deduplicated, {} failed, {} module results",
        t.done, t.filtered, t.skipped, t.deduplicated, t.failed, t.module_results
    );
    if summary.scheduler.cancelled {
        eprintln!(
            "interrupted: {} abandoned, {} not started",
            summary.scheduler.abandoned, summary.scheduler.dropped
        );
    }
    if let Some(last) = &summary.sink.last_value {
        eprintln!("last value: {}", last);
    }
    if let Some(output) = &summary.sink.output {
        eprintln!("output: {}", output.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_targets_skips_blank_lines() {
        let input = "example.com\n\n   \ntest.org  \r\n";
        let targets = collect_targets(input.as_bytes()).unwrap();
        assert_eq!(targets, vec!["example.com".to_string(), "test.org".to_string()]);
    }
}
