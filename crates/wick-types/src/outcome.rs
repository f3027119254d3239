//! Outcome of a single module invocation.

/// What one module produced for one input.
///
/// `Empty` and `Failed` both stop a pipeline-mode chain; they are kept apart
/// so reports can tell "found nothing" from "gave up after retries".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// The module produced at least one result.
    Ok(Vec<String>),
    /// The module ran (or was filtered) and nothing is left.
    Empty,
    /// The module failed: unknown spec, non-transient error, or retries exhausted.
    Failed(String),
}

impl ModuleOutcome {
    /// Build an outcome from a result list, mapping an empty list to `Empty`.
    pub fn from_results(results: Vec<String>) -> Self {
        if results.is_empty() {
            ModuleOutcome::Empty
        } else {
            ModuleOutcome::Ok(results)
        }
    }

    /// Results if any were produced.
    pub fn results(&self) -> &[String] {
        match self {
            ModuleOutcome::Ok(r) => r,
            _ => &[],
        }
    }

    /// Keep only results containing `needle`; an emptied list becomes `Empty`.
    pub fn retain_matching(self, needle: &str) -> Self {
        match self {
            ModuleOutcome::Ok(results) => Self::from_results(
                results.into_iter().filter(|r| r.contains(needle)).collect(),
            ),
            other => other,
        }
    }
}
