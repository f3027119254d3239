//! Run-level errors: the failures allowed to abort a whole batch.

use thiserror::Error;
use wick_types::ConfigError;

use crate::sink::SinkError;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("http client: {0}")]
    Http(String),
}
