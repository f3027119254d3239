//! Module specs, chains and the static contract every module publishes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Separator between positions in a module chain.
pub const CHAIN_SEPARATOR: char = '|';

/// Capability family of a module.
///
/// The family never changes the dispatch contract. It only tells the chain
/// executor whether a module wants multi-line input split into single lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Collector,
    Extractor,
    Connector,
    Output,
    Ai,
}

impl ModuleKind {
    /// Short prefix used in chain specs (`clc:whois`).
    pub fn prefix(self) -> &'static str {
        match self {
            ModuleKind::Collector => "clc",
            ModuleKind::Extractor => "ext",
            ModuleKind::Connector => "cnc",
            ModuleKind::Output => "out",
            ModuleKind::Ai => "ai",
        }
    }

    /// Long name, as shown in listings.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Collector => "collector",
            ModuleKind::Extractor => "extractor",
            ModuleKind::Connector => "connector",
            ModuleKind::Output => "output",
            ModuleKind::Ai => "ai",
        }
    }

    pub fn all() -> [ModuleKind; 5] {
        [
            ModuleKind::Collector,
            ModuleKind::Extractor,
            ModuleKind::Connector,
            ModuleKind::Output,
            ModuleKind::Ai,
        ]
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = ConfigError;

    /// Accepts both the short prefix and the long name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ModuleKind::all()
            .into_iter()
            .find(|k| k.prefix() == lower || k.as_str() == lower)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// A parsed `category:name` pair.
///
/// The category is kept verbatim (lowercased) so an unknown category still
/// reaches the resolver, which reports it as not found.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleSpec {
    pub category: String,
    pub name: String,
}

impl ModuleSpec {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into().to_ascii_lowercase(),
            name: name.into().to_ascii_lowercase(),
        }
    }

    /// The capability family, if the category is a known one.
    pub fn kind(&self) -> Option<ModuleKind> {
        self.category.parse().ok()
    }

    /// Registry key: the category normalized to its short prefix.
    pub fn key(&self) -> String {
        match self.kind() {
            Some(kind) => format!("{}:{}", kind.prefix(), self.name),
            None => format!("{}:{}", self.category, self.name),
        }
    }
}

impl fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

impl FromStr for ModuleSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (category, name) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidModuleSpec(s.to_string()))?;
        let (category, name) = (category.trim(), name.trim());
        if category.is_empty() || name.is_empty() {
            return Err(ConfigError::InvalidModuleSpec(s.to_string()));
        }
        Ok(ModuleSpec::new(category, name))
    }
}

/// An ordered, non-empty sequence of module specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChain {
    specs: Vec<ModuleSpec>,
}

impl ModuleChain {
    /// Parse `a:b|c:d`. Empty segments from stray separators are skipped.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let specs = input
            .split(CHAIN_SEPARATOR)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ModuleSpec>, _>>()?;

        if specs.is_empty() {
            return Err(ConfigError::EmptyChain);
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[ModuleSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Always false for a parsed chain; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl fmt::Display for ModuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", CHAIN_SEPARATOR)?;
            }
            write!(f, "{}", spec)?;
        }
        Ok(())
    }
}

/// Static information a module publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Name within its category (`whois` for `clc:whois`).
    pub name: String,
    /// Capability family.
    pub kind: ModuleKind,
    /// One-line description for listings.
    pub description: String,
}

impl ModuleMetadata {
    pub fn new(name: impl Into<String>, kind: ModuleKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
        }
    }

    /// The `category:name` string for this module.
    pub fn spec(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.name)
    }
}

/// Options passed to `Module::configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOptions {
    /// The input value for this run.
    pub data: String,
    /// Proxy URL for outbound requests.
    pub proxy: Option<String>,
    /// Retries the caller will attempt on transient failures.
    pub retry: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Keep previous results instead of clearing the buffer on the next run.
    pub accumulate: bool,
    /// Free-form options forwarded from the command line (`-O key=value`).
    pub extra: BTreeMap<String, String>,
}

impl ModuleOptions {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// Parse a `KEY=VALUE` pair for `ModuleOptions::extra`.
pub fn parse_option_pair(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidOption(raw.to_string())),
    }
}
