//! Module system for wick.
//!
//! Modules are pluggable units addressed as `category:name`. Every module,
//! built-in or embedder-supplied, implements the same `Module` trait.
//!
//! # Architecture
//!
//! ```text
//! ModuleRegistry
//! ├── clc:*  collectors   (whois, ...)
//! ├── ext:*  extractors   (url, email, ipv4, domain, hash)
//! ├── cnc:*  connectors   (http)
//! └── out:*  output sinks (file)
//! ```
//!
//! The registry maps keys to factories; every resolution builds a fresh
//! instance, so module state is never shared between workers.

mod builtin;
mod registry;
mod traits;

pub use builtin::register_builtins;
pub use registry::{ModuleRegistry, ResolveError};
pub use traits::{Module, ModuleError, ResultBuffer};
