//! Built-in modules for wick.
//!
//! These are always available. Each `register` call takes a factory, since
//! every chain resolution needs its own instance.

mod extract;
mod file;
mod http;
mod whois;

use super::ModuleRegistry;

/// Register all built-in modules with the registry.
///
/// `cnc:http` instances share `http`, so proxy and timeout come from the run.
pub fn register_builtins(registry: &mut ModuleRegistry, http: reqwest::Client) {
    registry.register(|| Box::new(extract::Extractor::url()));
    registry.register(|| Box::new(extract::Extractor::email()));
    registry.register(|| Box::new(extract::Extractor::ipv4()));
    registry.register(|| Box::new(extract::Extractor::domain()));
    registry.register(|| Box::new(extract::Extractor::hash()));
    registry.register(|| Box::new(whois::Whois::new()));
    registry.register(move || Box::new(http::HttpConnector::new(http.clone())));
    registry.register(|| Box::new(file::FileOutput::new()));
}
