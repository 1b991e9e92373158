//! Replays the reversal instructions of an audited mutation.

use crate::executor::apply_plan;
use crate::GuardConfig;
use guard_types::{
    is_valid_audit_id, AuditEntry, AuditStore, Clock, GuardError, RecordApi, Reversal,
    UndoError, UndoOutcome,
};
use serde_json::Value;
use std::sync::Arc;

pub struct UndoEngine {
    api: Arc<dyn RecordApi>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GuardConfig>,
}

impl UndoEngine {
    pub fn new(
        api: Arc<dyn RecordApi>,
        audit: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GuardConfig>,
    ) -> Self {
        Self {
            api,
            audit,
            clock,
            config,
        }
    }

    /// Undoes transaction `id`. Preconditions are checked in order, each a distinct error:
    /// id format, existence, age within the undo window, usable reversal instructions.
    ///
    /// The replay is not gated by a dry-run. On success a new entry is appended
    /// whose reversal is non-reversible and points back at `id`.
    pub async fn undo(
        &self,
        id: &str,
        auth_context: Option<Value>,
    ) -> Result<UndoOutcome, GuardError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(GuardError::Input("transaction id must not be empty".to_string()));
        }
        if !is_valid_audit_id(id) {
            return Err(GuardError::Input(format!(
                "malformed transaction id: {} (expected audit-<13 digits>-<8 hex>)",
                id
            )));
        }

        let entry = self
            .audit
            .find(id)
            .await?
            .ok_or_else(|| UndoError::NotFound(id.to_string()))?;

        let age = self.clock.now() - entry.timestamp;
        if age > self.config.undo_window {
            return Err(UndoError::Expired {
                id: id.to_string(),
                age_days: age.num_days(),
                window_days: self.config.undo_window.num_days(),
            }
            .into());
        }

        let instructions = match &entry.reversal_instructions {
            None => return Err(UndoError::InvalidReversal(id.to_string()).into()),
            Some(Reversal::NonReversible { undo_of }) => {
                return Err(UndoError::NonReversible {
                    id: id.to_string(),
                    undo_of: undo_of.clone(),
                }
                .into())
            }
            Some(Reversal::Replay(instructions)) => instructions,
        };
        let replay = instructions.to_request();
        let plan = replay
            .plan()
            .map_err(|_| UndoError::InvalidReversal(id.to_string()))?;
        self.audit.ready().await?;

        let applied = apply_plan(self.api.as_ref(), &instructions.table_id, &plan)
            .await
            .map_err(|e| {
                tracing::warn!(transaction_id = id, error = %e, "undo replay failed");
                UndoError::Failed(e.to_string())
            })?;

        let mut undo_entry = AuditEntry::new(
            self.clock.now(),
            instructions.operation,
            instructions.table_id.clone(),
        );
        undo_entry.record_id = instructions.record_id.clone().or_else(|| applied.record_id());
        undo_entry.payload = instructions.payload.clone();
        undo_entry.result = Some(applied.to_value());
        undo_entry.reversal_instructions = Some(Reversal::NonReversible {
            undo_of: id.to_string(),
        });
        undo_entry.auth_context = auth_context;
        let undo_entry = self.append_undo(undo_entry, &entry).await?;

        tracing::info!(
            transaction_id = id,
            undo_transaction_id = %undo_entry.id,
            undo_operation = %instructions.operation,
            "transaction undone"
        );
        Ok(UndoOutcome {
            success: true,
            transaction_id: id.to_string(),
            undo_transaction_id: undo_entry.id,
            original_operation: entry.operation,
            undo_operation: instructions.operation,
            table_id: instructions.table_id.clone(),
            record_id: undo_entry.record_id,
            message: format!(
                "undid {} on {} with {}",
                entry.operation, instructions.table_id, instructions.operation
            ),
        })
    }

    async fn append_undo(
        &self,
        undo_entry: AuditEntry,
        original: &AuditEntry,
    ) -> Result<AuditEntry, GuardError> {
        self.audit.append(undo_entry).await.map_err(|e| {
            tracing::error!(
                transaction_id = %original.id,
                error = %e,
                "undo applied but audit append failed"
            );
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use guard_audit::InMemoryAuditStore;
    use guard_remote::{Capability, MockRecordApi};
    use guard_types::{
        Fields, ManualClock, Operation, ReversalInstructions, TableSchema,
    };
    use serde_json::json;

    struct Fixture {
        api: Arc<MockRecordApi>,
        audit: Arc<InMemoryAuditStore>,
        clock: Arc<ManualClock>,
        engine: UndoEngine,
    }

    async fn fixture() -> Fixture {
        let api = Arc::new(MockRecordApi::new());
        api.add_table(TableSchema {
            id: "users".to_string(),
            name: "Users".to_string(),
            fields: Vec::new(),
        })
        .await;
        let audit = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = UndoEngine::new(
            api.clone(),
            audit.clone(),
            clock.clone(),
            Arc::new(GuardConfig::default()),
        );
        Fixture {
            api,
            audit,
            clock,
            engine,
        }
    }

    /// Appends a create entry for `record_id`, stamped `age` before the clock's now.
    async fn created(f: &Fixture, record_id: &str, age: Duration) -> AuditEntry {
        let mut entry = AuditEntry::new(f.clock.now() - age, Operation::Create, "users");
        entry.record_id = Some(record_id.to_string());
        entry.reversal_instructions = Some(Reversal::Replay(ReversalInstructions {
            operation: Operation::Delete,
            table_id: "users".to_string(),
            record_id: Some(record_id.to_string()),
            payload: None,
        }));
        f.audit.append(entry).await.unwrap()
    }

    fn undo_err(err: GuardError) -> UndoError {
        match err {
            GuardError::Undo(e) => e,
            other => panic!("expected undo error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_ids_are_input_errors() {
        let f = fixture().await;
        for id in ["", "  ", "audit-123-abc", "txn-1700000000000-deadbeef"] {
            assert!(
                matches!(f.engine.undo(id, None).await, Err(GuardError::Input(_))),
                "{id}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let f = fixture().await;
        let err = f
            .engine
            .undo("audit-1700000000000-deadbeef", None)
            .await
            .unwrap_err();
        assert!(matches!(undo_err(err), UndoError::NotFound(_)));
    }

    #[tokio::test]
    async fn window_boundary_is_thirty_days() {
        let f = fixture().await;
        let rec = f.api.seed("users", Fields::new()).await.unwrap();
        let old = created(&f, &rec.id, Duration::days(31)).await;
        let err = f.engine.undo(&old.id, None).await.unwrap_err();
        assert!(matches!(
            undo_err(err),
            UndoError::Expired {
                age_days: 31,
                window_days: 30,
                ..
            }
        ));

        let recent = created(&f, &rec.id, Duration::days(29)).await;
        let outcome = f.engine.undo(&recent.id, None).await.unwrap();
        assert!(outcome.success);
        assert!(f.api.records("users").await.is_empty());
    }

    #[tokio::test]
    async fn undo_writes_non_reversible_entry_with_auth_context() {
        let f = fixture().await;
        let rec = f.api.seed("users", Fields::new()).await.unwrap();
        let original = created(&f, &rec.id, Duration::hours(1)).await;
        let outcome = f
            .engine
            .undo(&original.id, Some(json!({ "user": "ops" })))
            .await
            .unwrap();
        assert_eq!(outcome.original_operation, Operation::Create);
        assert_eq!(outcome.undo_operation, Operation::Delete);
        assert_eq!(outcome.record_id.as_deref(), Some(rec.id.as_str()));

        let entries = f.audit.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        let undo = &entries[1];
        assert_eq!(undo.id, outcome.undo_transaction_id);
        assert!(undo.is_undo());
        assert_eq!(
            undo.reversal_instructions,
            Some(Reversal::NonReversible {
                undo_of: original.id.clone()
            })
        );
        assert_eq!(undo.auth_context, Some(json!({ "user": "ops" })));

        let err = f.engine.undo(&undo.id, None).await.unwrap_err();
        assert!(matches!(undo_err(err), UndoError::NonReversible { .. }));
    }

    #[tokio::test]
    async fn missing_reversal_is_invalid() {
        let f = fixture().await;
        let entry = AuditEntry::new(f.clock.now(), Operation::Update, "users");
        let entry = f.audit.append(entry).await.unwrap();
        let err = f.engine.undo(&entry.id, None).await.unwrap_err();
        assert!(matches!(undo_err(err), UndoError::InvalidReversal(_)));
    }

    #[tokio::test]
    async fn remote_failure_is_wrapped_and_not_audited() {
        let f = fixture().await;
        let rec = f.api.seed("users", Fields::new()).await.unwrap();
        let original = created(&f, &rec.id, Duration::minutes(1)).await;
        f.api.fail(Capability::DeleteRecord).await;
        let err = f.engine.undo(&original.id, None).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to undo transaction:"));
        assert_eq!(f.audit.read_all().await.unwrap().len(), 1);
        assert_eq!(f.api.records("users").await.len(), 1);
    }
}
