//! Per-target pipeline and the batch driver.
//!
//! ```text
//! target ─▶ filter ─▶ expand ─▶ last value ─▶ execute ─▶ emit lines
//!                                                │
//!                                                └─▶ chain(line) ─▶ emit results
//! ```
//!
//! Every failure stays inside its target. Only building the pipeline can
//! fail the batch.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use wick_types::{ModuleChain, ModuleOutcome};

use crate::chain::{ChainExecutor, ChainReport};
use crate::config::RunConfig;
use crate::context::{ExecutionContext, RunContext};
use crate::error::KernelError;
use crate::exec::{CommandExecutor, ExecError, ExecOutcome};
use crate::scheduler::{Scheduler, SchedulerReport};
use crate::sink::SinkSummary;
use crate::template::{Expansion, SkipReason, Template};

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetReport {
    /// Rejected by the target filter.
    Filtered,
    /// Template expansion produced nothing.
    Skipped(SkipReason),
    /// The expanded command already ran in this process.
    Deduplicated,
    /// The command or an output write failed.
    Failed(String),
    Cancelled,
    Done {
        /// Lines fed to the module chain (command output, or the expanded
        /// text when not executing).
        lines: usize,
        /// Module results written to the sink.
        module_results: usize,
    },
}

/// Runs one target from filter to output.
pub struct TargetPipeline {
    template: Template,
    chain: Option<ModuleChain>,
    pipe: Option<String>,
    execute: bool,
    base: ExecutionContext,
    executor: CommandExecutor,
    chains: ChainExecutor,
    run: Arc<RunContext>,
}

impl TargetPipeline {
    /// Parse the template and chain once for the whole batch.
    pub fn new(config: &RunConfig, template: &str, run: Arc<RunContext>) -> Result<Self, KernelError> {
        let chain = config
            .module
            .as_deref()
            .map(ModuleChain::parse)
            .transpose()?;
        let template = Template::parse(template, &config.placeholder, &run.functions);
        if let Some(e) = template.error() {
            tracing::warn!("template will not expand: {}", e);
        }

        Ok(Self {
            template,
            chain,
            pipe: config.pipe.clone(),
            execute: config.execute,
            base: ExecutionContext::from_config(config),
            executor: CommandExecutor::new(run.cache.clone(), config.timeout(), config.clean_output),
            chains: ChainExecutor::new(run.modules.clone(), run.errors.clone()),
            run,
        })
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn chain(&self) -> Option<&ModuleChain> {
        self.chain.as_ref()
    }

    pub async fn process(&self, target: &str, cancel: &CancellationToken) -> TargetReport {
        let mut ctx = self.base.clone();
        if !ctx.accepts(target) {
            tracing::debug!("filtered: {}", target);
            return TargetReport::Filtered;
        }

        let text = match self.template.expand(target, &mut ctx, &self.run.functions).await {
            Expansion::Ready(text) => text,
            Expansion::Skipped(reason) => {
                match &reason {
                    SkipReason::Function(e) => self.run.errors.warn(&e.to_string()),
                    other => tracing::debug!("{}: skipped ({:?})", target, other),
                }
                return TargetReport::Skipped(reason);
            }
        };

        if let Err(e) = self.run.sink.set_last_value(&text) {
            self.run.errors.warn(&e.to_string());
            return TargetReport::Failed(e.to_string());
        }

        let lines = if self.execute {
            match self.executor.execute(&text, self.pipe.as_deref(), cancel).await {
                Ok(ExecOutcome::Ran(output)) => {
                    for line in &output.stderr {
                        self.run.errors.warn(&format!("stderr: {}", line));
                    }
                    output.lines
                }
                Ok(ExecOutcome::Skipped) => return TargetReport::Deduplicated,
                Err(ExecError::Cancelled) => return TargetReport::Cancelled,
                Err(e) => {
                    tracing::debug!("command failed for {}: {}", target, text);
                    let message = e.to_string();
                    self.run.errors.warn(&message);
                    return TargetReport::Failed(message);
                }
            }
        } else {
            vec![text]
        };

        if (self.execute || self.chain.is_none())
            && let Err(e) = self.run.sink.emit(&lines, "", ctx.function_name())
        {
            self.run.errors.warn(&e.to_string());
            return TargetReport::Failed(e.to_string());
        }

        let Some(chain) = &self.chain else {
            return TargetReport::Done {
                lines: lines.len(),
                module_results: 0,
            };
        };

        let mut module_results = 0;
        for line in &lines {
            let report = self.chains.run(chain, line, &mut ctx, cancel).await;
            if report.cancelled {
                return TargetReport::Cancelled;
            }
            match self.write_chain(&report, &ctx) {
                Ok(n) => module_results += n,
                Err(message) => return TargetReport::Failed(message),
            }
        }

        TargetReport::Done {
            lines: lines.len(),
            module_results,
        }
    }

    /// Emit a chain's results: the final list in pipeline mode, one section
    /// per position in fan-out mode.
    fn write_chain(&self, report: &ChainReport, ctx: &ExecutionContext) -> Result<usize, String> {
        let sink = &self.run.sink;
        let function = ctx.function_name();
        let written = if ctx.fanout {
            let mut n = 0;
            for position in &report.positions {
                if let ModuleOutcome::Ok(results) = &position.outcome {
                    sink.emit_section(&position.header(), results, &position.spec.key(), function)
                        .map_err(|e| e.to_string())?;
                    n += results.len();
                }
            }
            n
        } else {
            sink.emit(&report.final_results, ctx.module_name(), function)
                .map_err(|e| e.to_string())?;
            report.final_results.len()
        };
        Ok(written)
    }
}

/// Counts of target outcomes across a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub done: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub deduplicated: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub module_results: usize,
}

impl BatchTally {
    fn record(&mut self, report: &TargetReport) {
        match report {
            TargetReport::Filtered => self.filtered += 1,
            TargetReport::Skipped(_) => self.skipped += 1,
            TargetReport::Deduplicated => self.deduplicated += 1,
            TargetReport::Failed(_) => self.failed += 1,
            TargetReport::Cancelled => self.cancelled += 1,
            TargetReport::Done { module_results, .. } => {
                self.done += 1;
                self.module_results += module_results;
            }
        }
    }
}

/// Final summary of a batch.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub scheduler: SchedulerReport,
    pub targets: BatchTally,
    pub sink: SinkSummary,
}

/// A whole run: one pipeline driven over every target by the scheduler.
pub struct Batch {
    pipeline: Arc<TargetPipeline>,
    scheduler: Scheduler,
    run: Arc<RunContext>,
}

impl Batch {
    pub fn new(config: &RunConfig, template: &str, run: Arc<RunContext>) -> Result<Self, KernelError> {
        let pipeline = TargetPipeline::new(config, template, run.clone())?;
        let scheduler = Scheduler::new(config.workers(), config.delay(), run.cancel.clone());
        Ok(Self {
            pipeline: Arc::new(pipeline),
            scheduler,
            run,
        })
    }

    pub async fn run<I>(&self, targets: I) -> BatchSummary
    where
        I: IntoIterator<Item = String>,
    {
        let tally = Arc::new(Mutex::new(BatchTally::default()));
        let pipeline = self.pipeline.clone();
        let shared = tally.clone();

        tracing::info!("starting batch with {} workers", self.scheduler.workers());
        let scheduler = self
            .scheduler
            .run(targets, move |target, cancel| {
                let pipeline = pipeline.clone();
                let tally = shared.clone();
                async move {
                    let report = pipeline.process(&target, &cancel).await;
                    tracing::trace!("{}: {:?}", target, report);
                    tally.lock().unwrap_or_else(|e| e.into_inner()).record(&report);
                }
            })
            .await;

        let targets = tally.lock().unwrap_or_else(|e| e.into_inner()).clone();
        BatchSummary {
            scheduler,
            targets,
            sink: self.run.sink.summary(),
        }
    }
}
