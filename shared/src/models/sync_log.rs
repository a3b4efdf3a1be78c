//! Sync run audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a sync run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Run still in progress
    Running,
    /// Completed within the deadline, no page-level failures
    Success,
    /// Stopped at the deadline or mid-run; progress up to that point is kept
    Partial,
    /// Aborted before any page completed (auth failure, upstream down)
    Failed,
}

impl SyncOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Audit record for one sync run against one channel
///
/// Created as `Running` when the run starts and finalized exactly once;
/// per-order failures accumulate in `errors` without aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: String,
    pub channel_id: String,
    pub outcome: SyncOutcome,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Raw orders pulled from the upstream, including ones that later failed
    pub orders_seen: u32,
    pub orders_created: u32,
    pub orders_updated: u32,
    pub orders_skipped: u32,
    pub pages_fetched: u32,
    /// Per-order error messages, keyed informally by external order ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncLog {
    pub fn start(channel_id: impl Into<String>) -> Self {
        Self {
            id: crate::util::new_id(),
            channel_id: channel_id.into(),
            outcome: SyncOutcome::Running,
            started_at: Utc::now(),
            finished_at: None,
            orders_seen: 0,
            orders_created: 0,
            orders_updated: 0,
            orders_skipped: 0,
            pages_fetched: 0,
            errors: Vec::new(),
        }
    }

    /// Finalize the run; a no-op if already final
    pub fn finalize(&mut self, outcome: SyncOutcome) {
        if self.outcome.is_final() {
            return;
        }
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    pub fn record_error(&mut self, external_order_id: &str, message: impl Into<String>) {
        self.errors
            .push(format!("{}: {}", external_order_id, message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_once() {
        let mut log = SyncLog::start("ch-1");
        assert_eq!(log.outcome, SyncOutcome::Running);

        log.finalize(SyncOutcome::Partial);
        let finished = log.finished_at;
        assert_eq!(log.outcome, SyncOutcome::Partial);

        // Second finalize is ignored
        log.finalize(SyncOutcome::Success);
        assert_eq!(log.outcome, SyncOutcome::Partial);
        assert_eq!(log.finished_at, finished);
    }

    #[test]
    fn test_record_error_keeps_order_id() {
        let mut log = SyncLog::start("ch-1");
        log.record_error("EXT-7", "validation failed");
        assert_eq!(log.errors, vec!["EXT-7: validation failed"]);
    }
}
