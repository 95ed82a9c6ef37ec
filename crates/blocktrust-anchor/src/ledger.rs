use blocktrust_core::{ChainTxRef, Digest};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RejectionReason;

/// How a single submission attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Anchored { tx_ref: ChainTxRef },
    /// An anchor mined by an earlier attempt was found and reused.
    Adopted { tx_ref: ChainTxRef },
    TransientFailure { reason: String },
    /// Sent but not yet mined; later attempts poll this hash instead of resending.
    Pending { tx_ref: ChainTxRef },
    Rejected { reason: RejectionReason },
    ContextFailure { reason: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Anchored { .. } | Self::Adopted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Anchored { .. } => "anchored",
            Self::Adopted { .. } => "adopted",
            Self::TransientFailure { .. } => "transient_failure",
            Self::Pending { .. } => "pending",
            Self::Rejected { .. } => "rejected",
            Self::ContextFailure { .. } => "context_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub operation_id: String,
    /// 1-based.
    pub attempt_number: u32,
    pub delay_before_attempt_ms: u64,
    pub chain_id: u64,
    #[serde(flatten)]
    pub digest: Digest,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptEntry {
    pub fn delay_before_attempt(&self) -> Duration {
        Duration::from_millis(self.delay_before_attempt_ms)
    }
}

/// Append-only journal of submission attempts, grouped by operation.
#[derive(Default)]
pub struct AttemptLedger {
    operations: DashMap<String, Vec<AttemptEntry>>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: AttemptEntry) {
        self.operations
            .entry(entry.operation_id.clone())
            .or_default()
            .push(entry);
    }

    /// All attempts for an operation, oldest first.
    pub fn entries(&self, operation_id: &str) -> Vec<AttemptEntry> {
        self.operations
            .get(operation_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn total_attempts(&self) -> usize {
        self.operations.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocktrust_core::HashAlgorithm;

    fn entry(op: &str, n: u32, outcome: AttemptOutcome) -> AttemptEntry {
        AttemptEntry {
            operation_id: op.into(),
            attempt_number: n,
            delay_before_attempt_ms: 0,
            chain_id: 137,
            digest: Digest::new([1u8; 32], HashAlgorithm::ContentHash),
            outcome,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_groups_by_operation() {
        let ledger = AttemptLedger::new();
        ledger.append(entry("a", 1, AttemptOutcome::TransientFailure { reason: "timeout".into() }));
        ledger.append(entry("a", 2, AttemptOutcome::Anchored { tx_ref: ChainTxRef::from_bytes([2u8; 32]) }));
        ledger.append(entry("b", 1, AttemptOutcome::Rejected { reason: RejectionReason::SignerDeclined }));

        let a = ledger.entries("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].attempt_number, 1);
        assert!(a[1].outcome.is_success());
        assert_eq!(ledger.operation_count(), 2);
        assert_eq!(ledger.total_attempts(), 3);
        assert!(ledger.entries("missing").is_empty());
    }

    #[test]
    fn test_entry_serializes_flat() {
        let value = serde_json::to_value(entry(
            "op",
            1,
            AttemptOutcome::TransientFailure { reason: "nonce too low".into() },
        ))
        .unwrap();
        assert_eq!(value["algorithm"], "content-hash");
        assert_eq!(value["outcome"]["status"], "transient_failure");
        assert_eq!(value["chain_id"], 137);
    }
}
