//! Tamper detection over a stored audit log.

use guard_types::{AuditStore, AuditStoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total: usize,
    pub valid: usize,
    /// Ids of entries whose stored hash does not match their content.
    pub tampered: Vec<String>,
    pub skipped_lines: usize,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.tampered.is_empty() && self.skipped_lines == 0
    }
}

/// Recomputes the hash of every stored entry and compares it with the stored one.
pub async fn verify_integrity(store: &dyn AuditStore) -> Result<IntegrityReport, AuditStoreError> {
    let scan = store.scan().await?;
    let mut report = IntegrityReport {
        total: scan.entries.len(),
        skipped_lines: scan.skipped_lines,
        ..Default::default()
    };
    for entry in &scan.entries {
        if entry.verify_hash() {
            report.valid += 1;
        } else {
            tracing::warn!(id = %entry.id, "audit entry hash mismatch");
            report.tampered.push(entry.id.clone());
        }
    }
    Ok(report)
}
