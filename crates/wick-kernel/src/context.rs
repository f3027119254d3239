//! Execution contexts.
//!
//! - `ExecutionContext` is per-target: created fresh for every target and
//!   dropped when its pipeline finishes.
//! - `RunContext` is per-process: the shared caches, the output sink, and the
//!   registries, handed to every worker behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wick_types::{ModuleOptions, OutputFormat};

use crate::config::RunConfig;
use crate::error::KernelError;
use crate::modules::ModuleRegistry;
use crate::retry::RetryPolicy;
use crate::sink::OutputSink;
use crate::state::{CommandCache, ErrorLimiter};
use crate::template::FunctionRegistry;

/// Transient per-target state.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Module currently running (`category:name`).
    pub module: Option<String>,
    /// First helper called by the template.
    pub function: Option<String>,
    /// Targets must contain this substring.
    pub filter: Option<String>,
    /// Helper results must contain this substring.
    pub iff: Option<String>,
    /// Module results must contain this substring.
    pub ifm: Option<String>,
    pub retry: RetryPolicy,
    pub proxy: Option<String>,
    pub format: OutputFormat,
    /// Every chain position receives the original target.
    pub fanout: bool,
    /// Extra options forwarded to modules.
    pub module_options: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// A fresh context for one target.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            module: None,
            function: None,
            filter: config.filter.clone(),
            iff: config.iff.clone(),
            ifm: config.ifm.clone(),
            retry: config.retry_policy(),
            proxy: config.proxy.clone(),
            format: config.format,
            fanout: config.fanout,
            module_options: config.module_options.clone(),
        }
    }

    /// Options for one module invocation on `data`.
    pub fn module_options(&self, data: impl Into<String>, accumulate: bool) -> ModuleOptions {
        ModuleOptions {
            data: data.into(),
            proxy: self.proxy.clone(),
            retry: self.retry.retries,
            retry_delay: self.retry.delay,
            accumulate,
            extra: self.module_options.clone(),
        }
    }

    /// Whether `target` passes the target filter.
    pub fn accepts(&self, target: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| target.contains(f))
    }

    /// `module` or empty, for output records.
    pub fn module_name(&self) -> &str {
        self.module.as_deref().unwrap_or("")
    }

    /// `function` or empty, for output records.
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or("")
    }
}

/// Process-wide state shared by every worker.
pub struct RunContext {
    pub cache: Arc<CommandCache>,
    pub errors: Arc<ErrorLimiter>,
    pub sink: Arc<OutputSink>,
    pub modules: Arc<ModuleRegistry>,
    pub functions: Arc<FunctionRegistry>,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Open the output files and build the registries for `config`.
    ///
    /// Fails only on resource acquisition: the HTTP client or the output
    /// files. The client is built first so a bad proxy never truncates an
    /// existing results log.
    pub fn from_config(config: &RunConfig, cancel: CancellationToken) -> Result<Self, KernelError> {
        let http = http_client(config)?;
        let sink = OutputSink::open(config.format, &config.output, &config.last_file)?;
        Ok(Self {
            cache: Arc::new(CommandCache::new()),
            errors: Arc::new(ErrorLimiter::new(config.error_threshold)),
            sink: Arc::new(sink),
            modules: Arc::new(ModuleRegistry::with_builtins(http.clone())),
            functions: Arc::new(FunctionRegistry::with_builtins(http)),
            cancel,
        })
    }

    /// Assemble a context from parts. Used by embedders and tests.
    pub fn new(
        sink: OutputSink,
        modules: ModuleRegistry,
        functions: FunctionRegistry,
        error_threshold: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache: Arc::new(CommandCache::new()),
            errors: Arc::new(ErrorLimiter::new(error_threshold)),
            sink: Arc::new(sink),
            modules: Arc::new(modules),
            functions: Arc::new(functions),
            cancel,
        }
    }
}

/// The run-wide HTTP client shared by template helpers and `cnc:http`.
pub fn http_client(config: &RunConfig) -> Result<reqwest::Client, KernelError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout() {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| KernelError::Http(format!("invalid proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| KernelError::Http(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_config() {
        let config = RunConfig {
            filter: Some(".com".into()),
            ifm: Some("http".into()),
            fanout: true,
            retry: 4,
            ..Default::default()
        };
        let ctx = ExecutionContext::from_config(&config);
        assert!(ctx.fanout);
        assert_eq!(ctx.retry.retries, 4);
        assert!(ctx.accepts("example.com"));
        assert!(!ctx.accepts("example.org"));
        assert_eq!(ctx.module_name(), "");
    }

    #[test]
    fn test_module_options_carry_context() {
        let mut ctx = ExecutionContext {
            proxy: Some("http://127.0.0.1:8080".into()),
            ..Default::default()
        };
        ctx.module_options.insert("path".into(), "/tmp/x".into());
        let opts = ctx.module_options("data", true);
        assert_eq!(opts.data, "data");
        assert!(opts.accumulate);
        assert_eq!(opts.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(opts.extra("path"), Some("/tmp/x"));
    }

    #[test]
    fn test_invalid_proxy_is_error() {
        let config = RunConfig {
            proxy: Some("http://[::1".into()),
            ..Default::default()
        };
        assert!(matches!(http_client(&config), Err(KernelError::Http(_))));
    }

    #[test]
    fn test_invalid_proxy_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("results.log");
        let last = dir.path().join("last.txt");
        std::fs::write(&output, "previous run\n").unwrap();

        let config = RunConfig {
            proxy: Some("http://[::1".into()),
            output: output.clone(),
            last_file: last.clone(),
            ..Default::default()
        };
        let result = RunContext::from_config(&config, CancellationToken::new());
        assert!(matches!(result, Err(KernelError::Http(_))));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous run\n");
        assert!(!last.exists());
    }

    #[test]
    fn test_from_config_shares_client_with_modules() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            output: dir.path().join("results.log"),
            last_file: dir.path().join("last.txt"),
            ..Default::default()
        };
        let run = RunContext::from_config(&config, CancellationToken::new()).unwrap();
        let spec: wick_types::ModuleSpec = "cnc:http".parse().unwrap();
        assert!(run.modules.contains(&spec));
        assert!(run.functions.contains("http_get"));
    }
}
