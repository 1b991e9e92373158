//! Error taxonomy shared by every layer.

/// Failure reported by the remote record API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote record not found: {0}")]
    NotFound(String),
    #[error("remote API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote API error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuditStoreError {
    #[error("audit io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("audit store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token store error: {0}")]
    Other(String),
}

/// An execute call without a valid, matching, passing dry-run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateViolation {
    #[error("no dry-run found for this operation; call it with dryRun=true first")]
    NoDryRun,
    #[error("validation expired; repeat the dry-run before executing")]
    Expired,
    #[error("data mismatch: payload differs from the one validated by the dry-run")]
    DataMismatch,
    #[error("cannot execute: dry-run validation failed: {}", .errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

/// Precondition or replay failure of an undo.
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("transaction {id} expired: {age_days} days old, undo window is {window_days} days")]
    Expired {
        id: String,
        age_days: i64,
        window_days: i64,
    },
    #[error("invalid reversal instructions for transaction {0}")]
    InvalidReversal(String),
    #[error("transaction {id} is itself an undo of {undo_of} and cannot be undone")]
    NonReversible { id: String, undo_of: String },
    #[error("failed to undo transaction: {0}")]
    Failed(String),
}

/// Umbrella error for the caller-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error(transparent)]
    Gate(#[from] GateViolation),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Audit(#[from] AuditStoreError),
    #[error(transparent)]
    Undo(#[from] UndoError),
    #[error(transparent)]
    Cache(#[from] TokenStoreError),
}
