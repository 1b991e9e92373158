//! Audit entries, reversal instructions, and audit id format.

use crate::{canonical_json, sha256_hex, MutationRequest, Operation};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const AUDIT_ID_PREFIX: &str = "audit-";

/// New audit id: `audit-<13-digit epoch millis>-<8 hex>`.
pub fn new_audit_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{:013}-{}",
        AUDIT_ID_PREFIX,
        at.timestamp_millis(),
        &suffix[..8]
    )
}

/// True when `id` has exactly the shape produced by [`new_audit_id`].
pub fn is_valid_audit_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(AUDIT_ID_PREFIX) else {
        return false;
    };
    let Some((millis, suffix)) = rest.split_once('-') else {
        return false;
    };
    millis.len() == 13
        && millis.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == 8
        && suffix.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Machine-executable inverse of a recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalInstructions {
    pub operation: Operation,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ReversalInstructions {
    /// The inverse expressed as an ordinary mutation request.
    pub fn to_request(&self) -> MutationRequest {
        MutationRequest {
            operation: self.operation,
            table_id: self.table_id.clone(),
            record_id: self.record_id.clone(),
            payload: self.payload.clone(),
            before_data: None,
            auth_context: None,
        }
    }
}

/// How (or whether) an audited mutation can be reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reversal {
    /// Replaying these instructions restores the prior state.
    Replay(ReversalInstructions),
    /// Written for undo mutations; undoing an undo is refused.
    NonReversible {
        #[serde(rename = "undoOf")]
        undo_of: String,
    },
}

/// Immutable record of one executed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub table_id: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub before_data: Option<Value>,
    #[serde(default)]
    pub reversal_instructions: Option<Reversal>,
    #[serde(default)]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_context: Option<Value>,
}

impl AuditEntry {
    /// Unsealed entry stamped at `at` (truncated to milliseconds) with a fresh id.
    pub fn new(at: DateTime<Utc>, operation: Operation, table_id: impl Into<String>) -> Self {
        let at = at.trunc_subsecs(3);
        Self {
            id: new_audit_id(at),
            timestamp: at,
            operation,
            table_id: table_id.into(),
            record_id: None,
            payload: None,
            result: None,
            before_data: None,
            reversal_instructions: None,
            hash: String::new(),
            auth_context: None,
        }
    }

    /// SHA-256 over the canonical JSON of the integrity-covered fields.
    ///
    /// `hash` and `authContext` are not covered.
    pub fn compute_hash(&self) -> String {
        let covered = json!({
            "id": self.id,
            "timestamp": self.timestamp,
            "operation": self.operation,
            "tableId": self.table_id,
            "recordId": self.record_id,
            "payload": self.payload,
            "result": self.result,
            "beforeData": self.before_data,
            "reversalInstructions": self.reversal_instructions,
        });
        sha256_hex(canonical_json(&covered).as_bytes())
    }

    /// Overwrites `hash` with a freshly computed one; an incoming hash is never trusted.
    pub fn seal(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    pub fn verify_hash(&self) -> bool {
        !self.hash.is_empty() && self.hash == self.compute_hash()
    }

    pub fn is_undo(&self) -> bool {
        matches!(
            self.reversal_instructions,
            Some(Reversal::NonReversible { .. })
        )
    }
}

/// Filter and pagination for listing audit entries (newest first).
#[derive(Debug, Clone, Default)]
pub struct AuditListOptions {
    pub table_id: Option<String>,
    pub operation: Option<Operation>,
    /// Return entries with timestamp >= since.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditListOptions {
    pub fn apply(&self, mut entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
        if let Some(ref table_id) = self.table_id {
            entries.retain(|e| &e.table_id == table_id);
        }
        if let Some(op) = self.operation {
            entries.retain(|e| e.operation == op);
        }
        if let Some(since) = self.since {
            entries.retain(|e| e.timestamp >= since);
        }
        entries.reverse();
        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.unwrap_or(100) as usize;
        entries.into_iter().skip(offset).take(limit).collect()
    }
}

/// Entries parsed from a store plus the number of unreadable lines skipped.
#[derive(Debug, Clone, Default)]
pub struct AuditScan {
    pub entries: Vec<AuditEntry>,
    pub skipped_lines: usize,
}
