use thiserror::Error;

/// Failure kinds that abort a stage or the whole run.
///
/// Per-record geometry problems are deliberately NOT represented here; they
/// are logged, skipped and tallied in [`RunDiagnostics`] so a single bad
/// feature can never sink a batch.
#[derive(Debug, Error)]
pub enum ConflationError {
    /// A required parameter is absent or out of range. Reported before any
    /// processing begins.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// One or more referenced input datasets do not exist. All offending
    /// inputs are aggregated into a single message.
    #[error("missing input dataset(s): {0}")]
    MissingDataset(String),

    /// Batch-level validation failure (duplicate candidate rows, a row both
    /// verified and rejected). Nothing is partially applied.
    #[error("consistency check failed: {0}")]
    Consistency(String),

    /// An output table or feature collection could not be created. The run
    /// aborts and partial outputs are removed by the caller.
    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A record dropped from a stage, with enough context to diagnose it.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedRecord {
    pub link_id: Option<String>,
    pub route_id: Option<String>,
    pub reason: String,
}

/// Accumulated per-record skip diagnostics for one stage invocation.
///
/// Workers build their own instance and the stage merges them after the
/// parallel section, so no diagnostics are mutated concurrently.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunDiagnostics {
    pub skipped: Vec<SkippedRecord>,
}

impl RunDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skipped feature and emit a warning with the ids involved.
    pub fn skip(&mut self, link_id: Option<&str>, route_id: Option<&str>, reason: &str) {
        log::warn!(
            "skipping record (link: {}, route: {}): {}",
            link_id.unwrap_or("-"),
            route_id.unwrap_or("-"),
            reason
        );
        self.skipped.push(SkippedRecord {
            link_id: link_id.map(str::to_owned),
            route_id: route_id.map(str::to_owned),
            reason: reason.to_owned(),
        });
    }

    pub fn merge(&mut self, other: RunDiagnostics) {
        self.skipped.extend(other.skipped);
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_all_records() {
        let mut a = RunDiagnostics::new();
        a.skip(Some("L1"), None, "degenerate geometry");

        let mut b = RunDiagnostics::new();
        b.skip(None, Some("R9"), "zero-length route");
        b.skip(Some("L2"), Some("R9"), "angle unresolvable");

        a.merge(b);
        assert_eq!(a.skipped_count(), 3);
        assert_eq!(a.skipped[1].route_id.as_deref(), Some("R9"));
    }
}
