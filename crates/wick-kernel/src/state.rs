//! Run-wide shared state: the command dedup cache and the error limiter.
//!
//! Both key on content hashes rather than raw strings so memory stays bounded
//! on long batches with high-cardinality commands and messages.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Default number of identical errors logged before suppression.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// SHA-256 of a string, truncated to 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }
}

/// Set of already-executed command hashes. Grows for the life of the run.
#[derive(Debug, Default)]
pub struct CommandCache {
    seen: Mutex<HashSet<ContentHash>>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `command` and return true if it had not been seen before.
    ///
    /// Check and insert happen under one lock, so of two workers racing on
    /// the same command exactly one gets `true`.
    pub fn first_seen(&self, command: &str) -> bool {
        let hash = ContentHash::of(command);
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Verdict for one error occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Under the threshold: log it.
    Log,
    /// First occurrence past the threshold: log a suppression notice instead.
    Suppress,
    /// Already suppressed: drop silently.
    Drop,
}

/// Frequency table capping how often an identical error is logged.
#[derive(Debug)]
pub struct ErrorLimiter {
    threshold: u32,
    counts: Mutex<HashMap<ContentHash, u32>>,
}

impl Default for ErrorLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

impl ErrorLimiter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `message` has been counted so far.
    pub fn occurrences(&self, message: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(&ContentHash::of(message)).copied().unwrap_or(0)
    }

    /// Count one occurrence of `message` and decide whether to log it.
    pub fn check(&self, message: &str) -> LogDecision {
        let hash = ContentHash::of(message);
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(hash).or_insert(0);
        *count = count.saturating_add(1);

        if *count <= self.threshold {
            LogDecision::Log
        } else if *count == self.threshold + 1 {
            LogDecision::Suppress
        } else {
            LogDecision::Drop
        }
    }

    /// True while `message` should still be logged.
    pub fn should_log(&self, message: &str) -> bool {
        self.check(message) == LogDecision::Log
    }

    /// Log `message` at warn level, subject to the threshold.
    pub fn warn(&self, message: &str) {
        match self.check(message) {
            LogDecision::Log => tracing::warn!("{}", message),
            LogDecision::Suppress => tracing::warn!(
                "suppressing further identical errors (seen {} times): {}",
                self.threshold + 1,
                message
            ),
            LogDecision::Drop => {}
        }
    }
}
