//! wick-kernel: the execution pipeline behind `wick`.
//!
//! This crate provides:
//!
//! - **Template**: placeholder substitution and inline helper calls
//! - **Modules**: the `Module` trait, the `category:name` registry, built-ins
//! - **Chain**: pipeline and fan-out execution of module chains
//! - **Exec**: subprocess execution with pipes, timeouts, and dedup
//! - **Scheduler**: bounded worker pool over a list of targets
//! - **Sink**: text/CSV/JSON formatting, the results log, the last value
//! - **Retry / State**: bounded retries, the command cache, error suppression
//! - **Pipeline**: the per-target flow that ties the pieces together

pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod modules;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod template;

pub use chain::{ChainExecutor, ChainReport, PositionReport};
pub use config::{ConfigFileError, MAX_WORKERS, RunConfig};
pub use context::{ExecutionContext, RunContext};
pub use error::KernelError;
pub use exec::{CommandExecutor, CommandOutput, ExecError, ExecOutcome};
pub use modules::{Module, ModuleError, ModuleRegistry, ResolveError, ResultBuffer};
pub use pipeline::{Batch, BatchSummary, BatchTally, TargetPipeline, TargetReport};
pub use retry::{RetryError, RetryPolicy, Retryable, Transient, with_retry};
pub use scheduler::{Scheduler, SchedulerReport};
pub use sink::{OutputSink, SinkError, SinkSummary};
pub use state::{CommandCache, ErrorLimiter, LogDecision};
pub use template::{Expansion, FunctionRegistry, HelperFunction, SkipReason, Template, TemplateError};

// Data types, for embedders that only depend on the kernel
pub use wick_types;
