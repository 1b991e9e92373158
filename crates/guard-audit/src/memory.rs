//! In-memory audit store (process lifetime only).

use async_trait::async_trait;
use guard_types::{AuditEntry, AuditScan, AuditStore, AuditStoreError};
use tokio::sync::RwLock;

pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Store pre-populated with already persisted entries, kept exactly as given.
    ///
    /// Used to replay history (including tampered history) in tests.
    pub fn with_entries(entries: Vec<AuditEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry, AuditStoreError> {
        let entry = entry.seal();
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn scan(&self) -> Result<AuditScan, AuditStoreError> {
        Ok(AuditScan {
            entries: self.entries.read().await.clone(),
            skipped_lines: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guard_types::Operation;

    #[tokio::test]
    async fn append_recomputes_the_hash() {
        let store = InMemoryAuditStore::new();
        let mut entry = AuditEntry::new(Utc::now(), Operation::Create, "users");
        entry.hash = "forged".to_string();
        let stored = store.append(entry).await.unwrap();
        assert_ne!(stored.hash, "forged");
        assert!(stored.verify_hash());
        assert_eq!(store.find(&stored.id).await.unwrap(), Some(stored));
    }
}
