//! Core module trait and types.

use async_trait::async_trait;
use thiserror::Error;
use wick_types::{ModuleMetadata, ModuleOptions};

use crate::retry::Transient;

/// Failures raised by `Module::run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// Connection-level failure; worth retrying.
    #[error("request failed: {0}")]
    Request(String),
    /// The remote side did not answer in time; worth retrying.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Anything else. Retrying will not help.
    #[error("{0}")]
    Failed(String),
}

impl Transient for ModuleError {
    fn is_transient(&self) -> bool {
        matches!(self, ModuleError::Request(_) | ModuleError::Timeout(_))
    }
}

/// A pluggable unit in a module chain.
///
/// Lifecycle per invocation: `configure` → `run` → `results`. An instance is
/// only ever driven by one worker.
#[async_trait]
pub trait Module: Send + Sync {
    /// Static information about this module.
    fn metadata(&self) -> ModuleMetadata;

    /// Set input data and options for the next `run`.
    fn configure(&mut self, options: ModuleOptions);

    /// Do the work, filling the result buffer.
    async fn run(&mut self) -> Result<(), ModuleError>;

    /// The result buffer. Empty means "nothing found".
    fn results(&self) -> &[String];
}

/// Result buffer with the clear-unless-accumulating rule built in.
#[derive(Debug, Clone, Default)]
pub struct ResultBuffer {
    items: Vec<String>,
    accumulate: bool,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accumulate(&mut self, accumulate: bool) {
        self.accumulate = accumulate;
    }

    /// Call at the start of `run`: clears previous results unless accumulating.
    pub fn begin(&mut self) {
        if !self.accumulate {
            self.items.clear();
        }
    }

    pub fn push(&mut self, item: impl Into<String>) {
        self.items.push(item.into());
    }

    /// Push `item` unless it is already present.
    pub fn push_unique(&mut self, item: impl Into<String>) {
        let item = item.into();
        if !self.items.contains(&item) {
            self.items.push(item);
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
