//! Module registry: `category:name` → factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use wick_types::{ModuleMetadata, ModuleSpec};

use super::builtin::register_builtins;
use super::traits::Module;

/// Resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("module not found: {0}")]
    NotFound(String),
}

type Factory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

struct Entry {
    metadata: ModuleMetadata,
    factory: Factory,
}

/// Registry of available modules.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with all built-in modules registered.
    ///
    /// `http` is the run-wide client handed to `cnc:http`.
    pub fn with_builtins(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry, http);
        registry
    }

    /// Register a factory. The key comes from the metadata of one instance.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let metadata = factory().metadata();
        self.entries.insert(
            metadata.spec(),
            Entry {
                metadata,
                factory: Arc::new(factory),
            },
        );
    }

    /// Build a fresh instance for `spec`.
    pub fn resolve(&self, spec: &ModuleSpec) -> Result<Box<dyn Module>, ResolveError> {
        self.entries
            .get(&spec.key())
            .map(|entry| (entry.factory)())
            .ok_or_else(|| ResolveError::NotFound(spec.to_string()))
    }

    pub fn contains(&self, spec: &ModuleSpec) -> bool {
        self.entries.contains_key(&spec.key())
    }

    /// Metadata of every registered module, sorted by key.
    pub fn list(&self) -> Vec<&ModuleMetadata> {
        self.entries.values().map(|e| &e.metadata).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_types::ModuleKind;

    fn builtins() -> ModuleRegistry {
        ModuleRegistry::with_builtins(reqwest::Client::new())
    }

    #[test]
    fn test_builtins_registered() {
        let registry = builtins();
        for key in ["ext:url", "ext:email", "ext:ipv4", "ext:domain", "ext:hash", "clc:whois", "cnc:http", "out:file"] {
            let spec: ModuleSpec = key.parse().unwrap();
            assert!(registry.contains(&spec), "missing {}", key);
        }
    }

    #[test]
    fn test_resolve_long_category_name() {
        let registry = builtins();
        let spec: ModuleSpec = "collector:whois".parse().unwrap();
        let module = registry.resolve(&spec).unwrap();
        assert_eq!(module.metadata().kind, ModuleKind::Collector);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = builtins();
        let spec: ModuleSpec = "ext:nope".parse().unwrap();
        assert_eq!(
            registry.resolve(&spec).err(),
            Some(ResolveError::NotFound("ext:nope".into()))
        );
        let spec: ModuleSpec = "zzz:url".parse().unwrap();
        assert!(registry.resolve(&spec).is_err());
    }

    #[test]
    fn test_list_sorted_by_key() {
        let registry = builtins();
        let keys: Vec<String> = registry.list().iter().map(|m| m.spec()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
