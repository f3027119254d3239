//! Command-line arguments and how they layer over the config file.

use std::path::PathBuf;

use clap::Parser;
use wick_kernel::RunConfig;
use wick_types::{ConfigError, ModuleChain, OutputFormat, parse_option_pair};

/// Expand a command template over every input line, concurrently
#[derive(Debug, Parser)]
#[command(name = "wick", version)]
#[command(about = "Expand a command template over every input line, concurrently", long_about = None)]
pub struct Cli {
    /// Command template; `{STRING}` is replaced by each input line
    #[arg(
        value_name = "TEMPLATE",
        required_unless_present_any = ["list_modules", "list_functions"]
    )]
    pub template: Option<String>,

    /// Read targets from FILE instead of stdin (one per line)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Module chain, e.g. `ext:url|clc:whois`
    #[arg(short, long, value_name = "CHAIN")]
    pub module: Option<String>,

    /// Concurrent workers
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Retries for transient module failures
    #[arg(long, value_name = "N")]
    pub retry: Option<u32>,

    /// Seconds between retries
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Run every chain module against the original target
    #[arg(long)]
    pub fanout: bool,

    /// Only process targets containing this substring
    #[arg(long, value_name = "TEXT")]
    pub filter: Option<String>,

    /// Drop expansions whose helper results lack this substring
    #[arg(long, value_name = "TEXT")]
    pub iff: Option<String>,

    /// Keep only module results containing this substring
    #[arg(long, value_name = "TEXT")]
    pub ifm: Option<String>,

    /// Output format: text, csv or json
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Results log file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// File recording every expanded value
    #[arg(long, value_name = "FILE")]
    pub last_file: Option<PathBuf>,

    /// Proxy URL for modules and helpers
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Pipe each command's stdout into CMD
    #[arg(long, value_name = "CMD")]
    pub pipe: Option<String>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Delay before each target, in milliseconds
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Do not execute; emit the expanded text or feed it to the chain
    #[arg(long)]
    pub no_exec: bool,

    /// Strip ANSI escapes and non-printables from command output
    #[arg(long)]
    pub clean: bool,

    /// Extra module option, repeatable
    #[arg(short = 'O', long = "module-opt", value_name = "KEY=VALUE")]
    pub module_opt: Vec<String>,

    /// Identical errors logged before suppression
    #[arg(long, value_name = "N")]
    pub error_threshold: Option<u32>,

    /// Config file (default: platform config dir, wick/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List registered modules and exit
    #[arg(long)]
    pub list_modules: bool,

    /// List template helper functions and exit
    #[arg(long)]
    pub list_functions: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Log level when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }

    /// Overlay the flags that were given onto `config`.
    ///
    /// The chain and format are validated here so a typo fails before any
    /// file is opened.
    pub fn apply(&self, config: &mut RunConfig) -> Result<(), ConfigError> {
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(retry) = self.retry {
            config.retry = retry;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay_secs = delay;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(delay) = self.delay {
            config.delay_ms = delay;
        }
        if let Some(format) = &self.format {
            config.format = format.parse::<OutputFormat>()?;
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(last) = &self.last_file {
            config.last_file = last.clone();
        }
        if let Some(threshold) = self.error_threshold {
            config.error_threshold = threshold;
        }
        if let Some(module) = &self.module {
            ModuleChain::parse(module)?;
            config.module = Some(module.clone());
        }

        overlay(&mut config.proxy, &self.proxy);
        overlay(&mut config.filter, &self.filter);
        overlay(&mut config.iff, &self.iff);
        overlay(&mut config.ifm, &self.ifm);
        overlay(&mut config.pipe, &self.pipe);

        config.fanout |= self.fanout;
        config.clean_output |= self.clean;
        if self.no_exec {
            config.execute = false;
        }

        for raw in &self.module_opt {
            let (key, value) = parse_option_pair(raw)?;
            config.module_options.insert(key, value);
        }
        Ok(())
    }
}

fn overlay(slot: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("wick").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_template_required() {
        assert!(Cli::try_parse_from(["wick"]).is_err());
        assert!(Cli::try_parse_from(["wick", "--list-modules"]).is_ok());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "-m", "ext:url|clc:whois", "-t", "3", "--retry", "4", "--fanout", "-f", "csv",
            "--ifm", "http", "-O", "path=/tmp/x", "--no-exec", "echo {STRING}",
        ]);
        let mut config = RunConfig {
            proxy: Some("http://from-file:8080".into()),
            ..Default::default()
        };
        cli.apply(&mut config).unwrap();

        assert_eq!(config.threads, 3);
        assert_eq!(config.retry, 4);
        assert!(config.fanout);
        assert!(!config.execute);
        assert_eq!(config.format, OutputFormat::Csv);
        assert_eq!(config.module.as_deref(), Some("ext:url|clc:whois"));
        assert_eq!(config.ifm.as_deref(), Some("http"));
        assert_eq!(config.proxy.as_deref(), Some("http://from-file:8080"));
        assert_eq!(
            config.module_options.get("path").map(String::as_str),
            Some("/tmp/x")
        );
        assert_eq!(cli.template.as_deref(), Some("echo {STRING}"));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = parse(&["echo"]);
        let mut config = RunConfig {
            threads: 42,
            fanout: true,
            ..Default::default()
        };
        cli.apply(&mut config).unwrap();
        assert_eq!(config.threads, 42);
        assert!(config.fanout);
        assert!(config.execute);
    }

    #[rstest]
    #[case(&["-f", "xml", "echo"])]
    #[case(&["-m", "nocolon", "echo"])]
    #[case(&["-m", "|", "echo"])]
    #[case(&["-O", "novalue", "echo"])]
    fn test_invalid_values_rejected(#[case] args: &[&str]) {
        let cli = parse(args);
        assert!(cli.apply(&mut RunConfig::default()).is_err());
    }

    #[rstest]
    #[case(&["echo"], "info")]
    #[case(&["-v", "echo"], "debug")]
    #[case(&["-q", "echo"], "error")]
    fn test_log_level(#[case] args: &[&str], #[case] expected: &str) {
        assert_eq!(parse(args).log_level(), expected);
    }
}
