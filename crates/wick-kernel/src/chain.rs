//! Module chain execution.
//!
//! A chain runs in one of two modes:
//!
//! - **pipeline**: position `i` receives the output of position `i - 1`. A
//!   position that ends up `Empty` or `Failed` (after the `ifm` filter)
//!   stops the chain.
//! - **fan-out**: every position receives the original target and is
//!   reported on its own. Nothing stops the chain.
//!
//! Unknown modules are recorded as `Failed` and skipped; the chain carries on
//! with the data it already had.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wick_types::{ModuleChain, ModuleKind, ModuleOutcome, ModuleSpec};

use crate::context::ExecutionContext;
use crate::modules::{Module, ModuleError, ModuleRegistry};
use crate::retry::{RetryError, Retryable, with_retry};
use crate::state::ErrorLimiter;

/// One chain position's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionReport {
    /// Zero-based position in the chain.
    pub position: usize,
    pub total: usize,
    pub spec: ModuleSpec,
    pub outcome: ModuleOutcome,
}

impl PositionReport {
    /// `[i/N] category:name`, one-based.
    pub fn header(&self) -> String {
        format!("[{}/{}] {}", self.position + 1, self.total, self.spec)
    }
}

/// Everything one chain run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Positions that were reached, in order.
    pub positions: Vec<PositionReport>,
    /// Output of the last position in pipeline mode. Always empty in fan-out
    /// mode and when the chain stopped early.
    pub final_results: Vec<String>,
    /// Position that stopped a pipeline chain.
    pub stopped_at: Option<usize>,
    pub cancelled: bool,
}

impl ChainReport {
    /// Whether the position at `index` was reached.
    pub fn reached(&self, index: usize) -> bool {
        self.positions.iter().any(|p| p.position == index)
    }
}

/// Drives a `&mut dyn Module` through `with_retry`.
struct ModuleAttempt<'a> {
    module: &'a mut dyn Module,
}

#[async_trait]
impl<'a> Retryable for ModuleAttempt<'a> {
    type Output = ();
    type Error = ModuleError;

    async fn attempt(&mut self) -> Result<(), ModuleError> {
        self.module.run().await
    }
}

/// Runs module chains for targets.
pub struct ChainExecutor {
    registry: Arc<ModuleRegistry>,
    errors: Arc<ErrorLimiter>,
}

impl fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainExecutor")
            .field("modules", &self.registry.len())
            .finish()
    }
}

impl ChainExecutor {
    pub fn new(registry: Arc<ModuleRegistry>, errors: Arc<ErrorLimiter>) -> Self {
        Self { registry, errors }
    }

    /// Run `chain` against `target` in the mode selected by `ctx.fanout`.
    ///
    /// `ctx.module` is left set to the last resolved position that ran.
    /// Unknown modules never overwrite it.
    pub async fn run(
        &self,
        chain: &ModuleChain,
        target: &str,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ChainReport {
        if ctx.fanout {
            self.run_fanout(chain, target, ctx, cancel).await
        } else {
            self.run_pipeline(chain, target, ctx, cancel).await
        }
    }

    async fn run_pipeline(
        &self,
        chain: &ModuleChain,
        target: &str,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ChainReport {
        let total = chain.len();
        let mut report = ChainReport::default();
        let mut data = vec![target.to_string()];
        let mut ran_any = false;

        for (position, spec) in chain.specs().iter().enumerate() {
            let mut module = match self.registry.resolve(spec) {
                Ok(module) => module,
                Err(e) => {
                    self.errors
                        .warn(&format!("{}, skipping position {}/{}", e, position + 1, total));
                    report.positions.push(PositionReport {
                        position,
                        total,
                        spec: spec.clone(),
                        outcome: ModuleOutcome::Failed(e.to_string()),
                    });
                    continue;
                }
            };
            ran_any = true;
            ctx.module = Some(spec.key());

            let Some(outcome) = self.invoke(module.as_mut(), spec, &data, ctx, cancel).await else {
                report.cancelled = true;
                return report;
            };
            let outcome = apply_ifm(outcome, ctx.ifm.as_deref());

            report.positions.push(PositionReport {
                position,
                total,
                spec: spec.clone(),
                outcome: outcome.clone(),
            });

            match outcome {
                ModuleOutcome::Ok(results) => data = results,
                ModuleOutcome::Empty | ModuleOutcome::Failed(_) => {
                    tracing::debug!(
                        "chain stopped at {} ({}/{}) for {}",
                        spec,
                        position + 1,
                        total,
                        target
                    );
                    report.stopped_at = Some(position);
                    return report;
                }
            }
        }

        if ran_any {
            report.final_results = data;
        }
        report
    }

    async fn run_fanout(
        &self,
        chain: &ModuleChain,
        target: &str,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> ChainReport {
        let total = chain.len();
        let mut report = ChainReport::default();
        let input = [target.to_string()];

        for (position, spec) in chain.specs().iter().enumerate() {
            let outcome = match self.registry.resolve(spec) {
                Ok(mut module) => {
                    ctx.module = Some(spec.key());
                    let Some(outcome) = self.invoke(module.as_mut(), spec, &input, ctx, cancel).await
                    else {
                        report.cancelled = true;
                        return report;
                    };
                    apply_ifm(outcome, ctx.ifm.as_deref())
                }
                Err(e) => {
                    self.errors
                        .warn(&format!("{}, skipping position {}/{}", e, position + 1, total));
                    ModuleOutcome::Failed(e.to_string())
                }
            };

            report.positions.push(PositionReport {
                position,
                total,
                spec: spec.clone(),
                outcome,
            });
        }
        report
    }

    /// Configure and run one module on `data`, with retries.
    ///
    /// A collector fed several lines gets one run per line with accumulation
    /// on. Everything else sees the lines joined with `\n`. Returns `None` if
    /// cancelled.
    async fn invoke(
        &self,
        module: &mut dyn Module,
        spec: &ModuleSpec,
        data: &[String],
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Option<ModuleOutcome> {
        let lines: Vec<&str> = data
            .iter()
            .flat_map(|d| d.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let collector = module.metadata().kind == ModuleKind::Collector;

        let inputs: Vec<String> = if collector && lines.len() > 1 {
            lines.iter().map(|l| l.to_string()).collect()
        } else {
            vec![lines.join("\n")]
        };
        let accumulate = inputs.len() > 1;

        let mut failure = None;
        let mut succeeded = false;
        for input in inputs {
            module.configure(ctx.module_options(input, accumulate));
            let mut attempt = ModuleAttempt { module: &mut *module };
            match with_retry(&mut attempt, ctx.retry, cancel).await {
                Ok(()) => succeeded = true,
                Err(RetryError::Cancelled) => return None,
                Err(e) => {
                    let message = format!("{}: {}", spec, e);
                    self.errors.warn(&message);
                    failure = Some(message);
                }
            }
        }

        let results = module.results().to_vec();
        Some(match failure {
            Some(message) if !succeeded || results.is_empty() => ModuleOutcome::Failed(message),
            _ => ModuleOutcome::from_results(results),
        })
    }
}

fn apply_ifm(outcome: ModuleOutcome, ifm: Option<&str>) -> ModuleOutcome {
    match ifm {
        Some(needle) => outcome.retain_matching(needle),
        None => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ResultBuffer;
    use crate::retry::RetryPolicy;
    use std::sync::Mutex;
    use std::time::Duration;
    use wick_types::{ModuleMetadata, ModuleOptions};

    /// Echoes each input line back, prefixed, and records what it saw.
    struct Tagger {
        name: &'static str,
        kind: ModuleKind,
        prefix: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        data: String,
        buffer: ResultBuffer,
    }

    #[async_trait]
    impl Module for Tagger {
        fn metadata(&self) -> ModuleMetadata {
            ModuleMetadata::new(self.name, self.kind, "test tagger")
        }

        fn configure(&mut self, options: ModuleOptions) {
            self.data = options.data;
            self.buffer.set_accumulate(options.accumulate);
        }

        async fn run(&mut self) -> Result<(), ModuleError> {
            self.buffer.begin();
            self.seen.lock().unwrap().push(self.data.clone());
            for line in self.data.lines() {
                self.buffer.push(format!("{}{}", self.prefix, line));
            }
            Ok(())
        }

        fn results(&self) -> &[String] {
            self.buffer.as_slice()
        }
    }

    /// Produces nothing.
    struct Nothing {
        seen: Arc<Mutex<Vec<String>>>,
        data: String,
    }

    #[async_trait]
    impl Module for Nothing {
        fn metadata(&self) -> ModuleMetadata {
            ModuleMetadata::new("nothing", ModuleKind::Extractor, "finds nothing")
        }

        fn configure(&mut self, options: ModuleOptions) {
            self.data = options.data;
        }

        async fn run(&mut self) -> Result<(), ModuleError> {
            self.seen.lock().unwrap().push(self.data.clone());
            Ok(())
        }

        fn results(&self) -> &[String] {
            &[]
        }
    }

    /// Always times out.
    struct Broken;

    #[async_trait]
    impl Module for Broken {
        fn metadata(&self) -> ModuleMetadata {
            ModuleMetadata::new("broken", ModuleKind::Connector, "always times out")
        }

        fn configure(&mut self, _options: ModuleOptions) {}

        async fn run(&mut self) -> Result<(), ModuleError> {
            Err(ModuleError::Timeout("never answers".into()))
        }

        fn results(&self) -> &[String] {
            &[]
        }
    }

    #[derive(Default, Clone)]
    struct Seen {
        a: Arc<Mutex<Vec<String>>>,
        b: Arc<Mutex<Vec<String>>>,
        nothing: Arc<Mutex<Vec<String>>>,
    }

    fn registry(seen: &Seen, b_kind: ModuleKind) -> Arc<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();
        let a = seen.a.clone();
        registry.register(move || {
            Box::new(Tagger {
                name: "a",
                kind: ModuleKind::Extractor,
                prefix: "a:",
                seen: a.clone(),
                data: String::new(),
                buffer: ResultBuffer::new(),
            })
        });
        let b = seen.b.clone();
        registry.register(move || {
            Box::new(Tagger {
                name: "b",
                kind: b_kind,
                prefix: "b:",
                seen: b.clone(),
                data: String::new(),
                buffer: ResultBuffer::new(),
            })
        });
        let nothing = seen.nothing.clone();
        registry.register(move || {
            Box::new(Nothing {
                seen: nothing.clone(),
                data: String::new(),
            })
        });
        registry.register(|| Box::new(Broken));
        Arc::new(registry)
    }

    fn executor(registry: Arc<ModuleRegistry>) -> ChainExecutor {
        ChainExecutor::new(registry, Arc::new(ErrorLimiter::new(5)))
    }

    fn ctx(fanout: bool) -> ExecutionContext {
        ExecutionContext {
            fanout,
            retry: RetryPolicy::none(),
            ..Default::default()
        }
    }

    fn chain(s: &str) -> ModuleChain {
        ModuleChain::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_feeds_output_forward() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);

        let report = exec.run(&chain("ext:a|ext:b"), "x", &mut ctx, &CancellationToken::new()).await;
        assert_eq!(report.final_results, vec!["b:a:x".to_string()]);
        assert_eq!(*seen.b.lock().unwrap(), vec!["a:x".to_string()]);
        assert_eq!(ctx.module.as_deref(), Some("ext:b"));
        assert_eq!(report.stopped_at, None);
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_empty() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);

        let report = exec
            .run(&chain("ext:nothing|ext:a|ext:b"), "x", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(report.stopped_at, Some(0));
        assert!(report.final_results.is_empty());
        assert!(!report.reached(1));
        assert!(seen.a.lock().unwrap().is_empty());
        assert!(seen.b.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_ifm_filters_and_stops() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);
        ctx.ifm = Some("zzz".into());

        let report = exec.run(&chain("ext:a|ext:b"), "x", &mut ctx, &CancellationToken::new()).await;
        assert_eq!(report.positions[0].outcome, ModuleOutcome::Empty);
        assert_eq!(report.stopped_at, Some(0));
        assert!(seen.b.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_ifm_keeps_matching() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);
        ctx.ifm = Some("two".into());

        let report = exec
            .run(&chain("ext:a"), "one\ntwo\nthree two", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(
            report.final_results,
            vec!["a:two".to_string(), "a:three two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_module_passes_data_through() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);

        let report = exec
            .run(&chain("ext:missing|ext:a"), "x", &mut ctx, &CancellationToken::new())
            .await;
        assert!(matches!(report.positions[0].outcome, ModuleOutcome::Failed(_)));
        assert_eq!(report.final_results, vec!["a:x".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_module_is_warned_and_keeps_last_module_name() {
        let seen = Seen::default();
        let errors = Arc::new(ErrorLimiter::new(5));
        let exec = ChainExecutor::new(registry(&seen, ModuleKind::Extractor), errors.clone());
        let mut ctx = ctx(false);

        let report = exec
            .run(&chain("ext:a|ext:missing"), "x", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(report.final_results, vec!["a:x".to_string()]);
        assert_eq!(ctx.module.as_deref(), Some("ext:a"));
        assert_eq!(errors.occurrences("module not found: ext:missing, skipping position 2/2"), 1);

        let mut ctx = self::ctx(true);
        exec.run(&chain("ext:a|ext:missing"), "x", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(ctx.module.as_deref(), Some("ext:a"));
        assert_eq!(errors.occurrences("module not found: ext:missing, skipping position 2/2"), 2);
    }

    #[tokio::test]
    async fn test_only_unknown_modules_yield_nothing() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);

        let report = exec.run(&chain("ext:missing"), "x", &mut ctx, &CancellationToken::new()).await;
        assert!(report.final_results.is_empty());
        assert_eq!(report.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_collector_gets_one_run_per_line() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Collector));
        let mut ctx = ctx(false);

        let report = exec
            .run(&chain("ext:a|clc:b"), "p\nq", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(
            *seen.b.lock().unwrap(),
            vec!["a:p".to_string(), "a:q".to_string()]
        );
        assert_eq!(
            report.final_results,
            vec!["b:a:p".to_string(), "b:a:q".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_collector_gets_joined_lines() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);

        exec.run(&chain("ext:a|ext:b"), "p\nq", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(*seen.b.lock().unwrap(), vec!["a:p\na:q".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_position() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);
        ctx.retry = RetryPolicy::new(2, Duration::from_secs(1));

        let report = exec
            .run(&chain("cnc:broken|ext:a"), "x", &mut ctx, &CancellationToken::new())
            .await;
        match &report.positions[0].outcome {
            ModuleOutcome::Failed(message) => assert!(message.contains("3 attempts"), "{}", message),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(report.stopped_at, Some(0));
        assert!(seen.a.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fanout_runs_every_position_on_target() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(true);

        let report = exec
            .run(&chain("ext:nothing|ext:a|ext:b"), "x", &mut ctx, &CancellationToken::new())
            .await;
        assert_eq!(*seen.nothing.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(*seen.a.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(*seen.b.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(report.positions.len(), 3);
        assert_eq!(report.positions[2].header(), "[3/3] ext:b");
        assert!(report.final_results.is_empty());
        assert_eq!(report.stopped_at, None);
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let seen = Seen::default();
        let exec = executor(registry(&seen, ModuleKind::Extractor));
        let mut ctx = ctx(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = exec.run(&chain("ext:a"), "x", &mut ctx, &cancel).await;
        assert!(report.cancelled);
        assert!(report.positions.is_empty());
    }
}
