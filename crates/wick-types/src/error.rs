//! Configuration errors shared by the kernel and the CLI.

use thiserror::Error;

/// Errors raised while interpreting user-supplied configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported output format: {0} (expected text, csv or json)")]
    UnknownFormat(String),
    #[error("invalid module spec '{0}': expected category:name")]
    InvalidModuleSpec(String),
    #[error("unknown module category: {0}")]
    UnknownCategory(String),
    #[error("module chain is empty")]
    EmptyChain,
    #[error("invalid module option '{0}': expected KEY=VALUE")]
    InvalidOption(String),
}
