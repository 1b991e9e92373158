//! Performs gated mutations and writes their audit entries.

use crate::GuardConfig;
use guard_types::{
    AuditEntry, AuditStore, Clock, Fields, GuardError, MutationOutcome, MutationPlan,
    MutationRequest, Operation, Record, RecordApi, RecordUpdate, RemoteError, Reversal,
    ReversalInstructions,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// What the remote API returned for one applied plan.
#[derive(Debug, Clone)]
pub(crate) enum Applied {
    Record(Record),
    Records(Vec<Record>),
    Deleted(String),
    DeletedMany(Vec<String>),
}

impl Applied {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Applied::Record(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            Applied::Records(rs) => serde_json::to_value(rs).unwrap_or(Value::Null),
            Applied::Deleted(id) => json!({ "id": id, "deleted": true }),
            Applied::DeletedMany(ids) => json!({
                "records": ids.iter().map(|id| json!({ "id": id, "deleted": true })).collect::<Vec<_>>()
            }),
        }
    }

    /// Id of the single record touched, if any.
    pub(crate) fn record_id(&self) -> Option<String> {
        match self {
            Applied::Record(r) => Some(r.id.clone()),
            Applied::Deleted(id) => Some(id.clone()),
            _ => None,
        }
    }
}

/// Issues the one remote call that `plan` describes.
pub(crate) async fn apply_plan(
    api: &dyn RecordApi,
    table_id: &str,
    plan: &MutationPlan,
) -> Result<Applied, RemoteError> {
    Ok(match plan {
        MutationPlan::Create { fields } => Applied::Record(api.create_record(table_id, fields).await?),
        MutationPlan::Update { record_id, fields } => {
            Applied::Record(api.update_record(table_id, record_id, fields).await?)
        }
        MutationPlan::Delete { record_id } => {
            Applied::Deleted(api.delete_record(table_id, record_id).await?)
        }
        MutationPlan::BulkCreate { records } => {
            Applied::Records(api.create_records(table_id, records).await?)
        }
        MutationPlan::BulkUpdate { records } => {
            Applied::Records(api.update_records(table_id, records).await?)
        }
        MutationPlan::BulkDelete { record_ids } => {
            Applied::DeletedMany(api.delete_records(table_id, record_ids).await?)
        }
    })
}

/// Prior state of the records a plan touches, in plan order.
#[derive(Debug, Default)]
struct BeforeState {
    records: Vec<(String, Option<Fields>)>,
}

impl BeforeState {
    fn get(&self, id: &str) -> Option<&Fields> {
        self.records
            .iter()
            .find(|(rid, _)| rid == id)
            .and_then(|(_, f)| f.as_ref())
    }

    fn to_value(&self, bulk: bool) -> Option<Value> {
        if bulk {
            let items: Vec<Value> = self
                .records
                .iter()
                .filter_map(|(id, f)| f.as_ref().map(|f| json!({ "id": id, "fields": f })))
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        } else {
            self.records
                .first()
                .and_then(|(_, f)| f.clone())
                .map(Value::Object)
        }
    }
}

pub struct MutationExecutor {
    api: Arc<dyn RecordApi>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GuardConfig>,
}

impl MutationExecutor {
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

    /// Runs an already-authorized mutation and appends its audit entry.
    ///
    /// Returns only after the entry is persisted. An audit store that is not
    /// ready fails the call before anything reaches the remote API. If the remote
    /// call succeeded but the append failed, the error is returned and logged at
    /// error level.
    pub async fn execute(&self, req: &MutationRequest) -> Result<MutationOutcome, GuardError> {
        let plan = req.plan()?;
        self.audit.ready().await?;
        let mut warnings = Vec::new();
        let before = self.capture_before(req, &plan, &mut warnings).await;
        let computed = match plan.operation() {
            Operation::Delete | Operation::BulkDelete => self.computed_fields(&req.table_id).await,
            _ => HashSet::new(),
        };

        let applied = apply_plan(self.api.as_ref(), &req.table_id, &plan).await?;
        let reversal = self.reversal_for(&req.table_id, &plan, &applied, &before, &computed);

        let mut entry = AuditEntry::new(self.clock.now(), plan.operation(), req.table_id.clone());
        entry.record_id = match &plan {
            MutationPlan::Update { record_id, .. } | MutationPlan::Delete { record_id } => {
                Some(record_id.clone())
            }
            _ => applied.record_id(),
        };
        entry.payload = req.payload.clone();
        entry.result = Some(applied.to_value());
        entry.before_data = before.to_value(plan.batch_len().is_some());
        entry.reversal_instructions = Some(Reversal::Replay(reversal));
        entry.auth_context = req.auth_context.clone();

        let entry = match self.audit.append(entry).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(
                    operation = %req.operation,
                    table_id = %req.table_id,
                    error = %e,
                    "mutation applied but audit append failed"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            transaction_id = %entry.id,
            operation = %entry.operation,
            table_id = %entry.table_id,
            record_id = entry.record_id.as_deref().unwrap_or("-"),
            "mutation executed"
        );
        Ok(MutationOutcome {
            transaction_id: entry.id,
            operation: entry.operation,
            table_id: entry.table_id,
            record_id: entry.record_id,
            result: entry.result.unwrap_or(Value::Null),
            warnings,
        })
    }

    /// Best-effort fetch of the records an update or delete will touch.
    async fn capture_before(
        &self,
        req: &MutationRequest,
        plan: &MutationPlan,
        warnings: &mut Vec<String>,
    ) -> BeforeState {
        let ids: Vec<&str> = match plan {
            MutationPlan::Update { record_id, .. } | MutationPlan::Delete { record_id } => {
                vec![record_id.as_str()]
            }
            MutationPlan::BulkUpdate { records } => records.iter().map(|r| r.id.as_str()).collect(),
            MutationPlan::BulkDelete { record_ids } => {
                record_ids.iter().map(String::as_str).collect()
            }
            MutationPlan::Create { .. } | MutationPlan::BulkCreate { .. } => {
                return BeforeState::default()
            }
        };
        let single = plan.batch_len().is_none();
        let mut state = BeforeState::default();
        for id in ids {
            let fields = match self.api.get_record(&req.table_id, id).await {
                Ok(record) => Some(record.fields),
                Err(e) => {
                    tracing::warn!(
                        table_id = %req.table_id,
                        record_id = id,
                        error = %e,
                        "could not capture prior record state"
                    );
                    match (&req.before_data, single) {
                        (Some(supplied), true) => {
                            warnings.push(format!(
                                "could not fetch current state of {}: {}; using caller-supplied beforeData",
                                id, e
                            ));
                            Some(supplied.clone())
                        }
                        _ => {
                            warnings.push(format!(
                                "could not fetch current state of {}: {}; undo will not restore its previous values",
                                id, e
                            ));
                            None
                        }
                    }
                }
            };
            state.records.push((id.to_string(), fields));
        }
        state
    }

    /// Names of remote-computed fields, which a recreate must not send back.
    async fn computed_fields(&self, table_id: &str) -> HashSet<String> {
        match self.api.get_schema(table_id).await {
            Ok(schema) => schema
                .fields
                .into_iter()
                .filter(|f| f.field_type.is_computed())
                .map(|f| f.name)
                .collect(),
            Err(e) => {
                tracing::debug!(table_id, error = %e, "schema unavailable while capturing delete");
                HashSet::new()
            }
        }
    }

    fn reversal_for(
        &self,
        table_id: &str,
        plan: &MutationPlan,
        applied: &Applied,
        before: &BeforeState,
        computed: &HashSet<String>,
    ) -> ReversalInstructions {
        let (operation, record_id, payload) = match plan {
            MutationPlan::Create { .. } => (Operation::Delete, applied.record_id(), None),
            MutationPlan::Update { record_id, fields } => (
                Operation::Update,
                Some(record_id.clone()),
                Some(Value::Object(project(before.get(record_id), fields))),
            ),
            MutationPlan::Delete { record_id } => (
                Operation::Create,
                None,
                Some(Value::Object(
                    self.recreatable(before.get(record_id), computed),
                )),
            ),
            MutationPlan::BulkCreate { .. } => {
                let ids: Vec<Value> = match applied {
                    Applied::Records(records) => {
                        records.iter().map(|r| Value::String(r.id.clone())).collect()
                    }
                    _ => Vec::new(),
                };
                (Operation::BulkDelete, None, Some(Value::Array(ids)))
            }
            MutationPlan::BulkUpdate { records } => {
                let restore: Vec<RecordUpdate> = records
                    .iter()
                    .map(|r| RecordUpdate {
                        id: r.id.clone(),
                        fields: project(before.get(&r.id), &r.fields),
                    })
                    .collect();
                (
                    Operation::BulkUpdate,
                    None,
                    Some(serde_json::to_value(restore).unwrap_or(Value::Null)),
                )
            }
            MutationPlan::BulkDelete { record_ids } => {
                let recreate: Vec<Value> = record_ids
                    .iter()
                    .map(|id| Value::Object(self.recreatable(before.get(id), computed)))
                    .collect();
                (Operation::BulkCreate, None, Some(Value::Array(recreate)))
            }
        };
        ReversalInstructions {
            operation,
            table_id: table_id.to_string(),
            record_id,
            payload,
        }
    }

    /// Prior fields minus system-owned and computed ones.
    fn recreatable(&self, before: Option<&Fields>, computed: &HashSet<String>) -> Fields {
        before
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(k, _)| !self.config.is_system_field(k) && !computed.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Prior values of exactly the keys an update touched; keys absent before map to null.
///
/// Without captured prior state the restore payload is empty.
fn project(before: Option<&Fields>, touched: &Fields) -> Fields {
    let Some(before) = before else {
        return Fields::new();
    };
    touched
        .keys()
        .map(|k| (k.clone(), before.get(k).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_audit::InMemoryAuditStore;
    use guard_remote::{Capability, MockRecordApi};
    use guard_types::{FieldSchema, FieldType, ManualClock, TableSchema};

    fn obj(v: Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    async fn setup() -> (Arc<MockRecordApi>, Arc<InMemoryAuditStore>, MutationExecutor) {
        let api = Arc::new(MockRecordApi::new());
        api.add_table(TableSchema {
            id: "users".to_string(),
            name: "Users".to_string(),
            fields: vec![
                FieldSchema {
                    name: "name".to_string(),
                    field_type: FieldType::SingleLineText,
                    required: true,
                },
                FieldSchema {
                    name: "seq".to_string(),
                    field_type: FieldType::AutoNumber,
                    required: false,
                },
            ],
        })
        .await;
        let audit = Arc::new(InMemoryAuditStore::new());
        let executor = MutationExecutor::new(
            api.clone(),
            audit.clone(),
            Arc::new(ManualClock::default()),
            Arc::new(GuardConfig::default()),
        );
        (api, audit, executor)
    }

    fn replay(entry: &AuditEntry) -> &ReversalInstructions {
        match entry.reversal_instructions.as_ref() {
            Some(Reversal::Replay(r)) => r,
            other => panic!("expected replay reversal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_is_reversed_by_delete_of_new_id() {
        let (_, audit, executor) = setup().await;
        let outcome = executor
            .execute(&MutationRequest::create("users", obj(json!({ "name": "Ada" }))))
            .await
            .unwrap();
        let new_id = outcome.record_id.clone().unwrap();
        let entries = audit.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, outcome.transaction_id);
        assert!(entries[0].verify_hash());
        let r = replay(&entries[0]);
        assert_eq!(r.operation, Operation::Delete);
        assert_eq!(r.record_id.as_deref(), Some(new_id.as_str()));
    }

    #[tokio::test]
    async fn update_reversal_restores_only_touched_keys() {
        let (api, audit, executor) = setup().await;
        let rec = api
            .seed("users", obj(json!({ "name": "Ada", "team": "core" })))
            .await
            .unwrap();
        executor
            .execute(&MutationRequest::update(
                "users",
                &rec.id,
                obj(json!({ "name": "Grace", "nick": "G" })),
            ))
            .await
            .unwrap();
        let entry = &audit.read_all().await.unwrap()[0];
        let r = replay(entry);
        assert_eq!(r.operation, Operation::Update);
        assert_eq!(r.payload, Some(json!({ "name": "Ada", "nick": null })));
        assert_eq!(entry.before_data, Some(json!({ "name": "Ada", "team": "core" })));
    }

    #[tokio::test]
    async fn delete_reversal_drops_system_and_computed_fields() {
        let (api, audit, executor) = setup().await;
        let rec = api
            .seed("users", obj(json!({ "name": "Ada", "seq": 7, "createdTime": "x" })))
            .await
            .unwrap();
        executor
            .execute(&MutationRequest::delete("users", &rec.id))
            .await
            .unwrap();
        let r = replay(&audit.read_all().await.unwrap()[0]).clone();
        assert_eq!(r.operation, Operation::Create);
        assert_eq!(r.payload, Some(json!({ "name": "Ada" })));
    }

    #[tokio::test]
    async fn failed_capture_degrades_to_warning() {
        let (api, audit, executor) = setup().await;
        let rec = api.seed("users", obj(json!({ "name": "Ada" }))).await.unwrap();
        api.fail(Capability::GetRecord).await;
        let outcome = executor
            .execute(&MutationRequest::delete("users", &rec.id))
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(api.records("users").await.is_empty());
        let entry = &audit.read_all().await.unwrap()[0];
        assert_eq!(entry.before_data, None);
        assert_eq!(replay(entry).payload, Some(json!({})));
    }

    #[tokio::test]
    async fn caller_before_data_is_the_fallback() {
        let (api, audit, executor) = setup().await;
        let rec = api.seed("users", obj(json!({ "name": "Ada" }))).await.unwrap();
        api.fail(Capability::GetRecord).await;
        let mut req = MutationRequest::update("users", &rec.id, obj(json!({ "name": "Grace" })));
        req.before_data = Some(obj(json!({ "name": "Ada (cached)" })));
        let outcome = executor.execute(&req).await.unwrap();
        assert!(outcome.warnings[0].contains("caller-supplied"));
        let entry = &audit.read_all().await.unwrap()[0];
        assert_eq!(replay(entry).payload, Some(json!({ "name": "Ada (cached)" })));
    }

    #[tokio::test]
    async fn remote_failure_writes_no_audit_entry() {
        let (api, audit, executor) = setup().await;
        api.fail(Capability::CreateRecord).await;
        let err = executor
            .execute(&MutationRequest::create("users", obj(json!({ "name": "Ada" }))))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Remote(_)));
        assert!(audit.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_operations_are_audited_with_array_reversals() {
        let (api, audit, executor) = setup().await;
        let created = executor
            .execute(&MutationRequest::bulk_create(
                "users",
                vec![obj(json!({ "name": "A" })), obj(json!({ "name": "B" }))],
            ))
            .await
            .unwrap();
        assert_eq!(created.record_id, None);
        let ids: Vec<String> = api.records("users").await.into_iter().map(|r| r.id).collect();

        executor
            .execute(&MutationRequest::bulk_update(
                "users",
                vec![RecordUpdate {
                    id: ids[0].clone(),
                    fields: obj(json!({ "name": "A2" })),
                }],
            ))
            .await
            .unwrap();
        executor
            .execute(&MutationRequest::bulk_delete("users", ids.clone()))
            .await
            .unwrap();

        let entries = audit.read_all().await.unwrap();
        assert_eq!(entries.len(), 3);
        let ops: Vec<Operation> = entries.iter().map(|e| replay(e).operation).collect();
        assert_eq!(
            ops,
            vec![Operation::BulkDelete, Operation::BulkUpdate, Operation::BulkCreate]
        );
        assert_eq!(replay(&entries[0]).payload, Some(json!(ids)));
        assert_eq!(
            replay(&entries[1]).payload,
            Some(json!([{ "id": ids[0], "fields": { "name": "A" } }]))
        );
        assert_eq!(
            replay(&entries[2]).payload,
            Some(json!([{ "name": "A2" }, { "name": "B" }]))
        );
    }
}
