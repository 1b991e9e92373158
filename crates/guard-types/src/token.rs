//! Validation tokens: the cache entries that record "this exact operation was just validated".

use crate::{payload_hash, MutationRequest, Operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a validated operation: `(operation, tableId, recordId | "new", payloadHash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub operation: Operation,
    pub table_id: String,
    pub record_key: String,
    pub payload_hash: String,
}

impl CacheKey {
    pub fn for_request(req: &MutationRequest) -> Self {
        Self {
            operation: req.operation,
            table_id: req.table_id.clone(),
            record_key: req.record_key().to_string(),
            payload_hash: payload_hash(req.payload.as_ref()),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.operation, self.table_id, self.record_key, self.payload_hash
        )
    }
}

/// One dry-run verdict awaiting consumption by an execute call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationToken {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    pub payload_hash: String,
    pub validated: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationToken {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.created_at > ttl
    }
}
