//! Mutation requests, typed plans, remote records and schemas, and caller-facing results.

use crate::GuardError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map of a remote record.
pub type Fields = serde_json::Map<String, Value>;

/// Record id placeholder used in cache keys when the request targets no existing record.
pub const NEW_RECORD_KEY: &str = "new";

/// Mutating operation against a remote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::BulkCreate => "bulk_create",
            Operation::BulkUpdate => "bulk_update",
            Operation::BulkDelete => "bulk_delete",
        }
    }

    pub fn is_bulk(self) -> bool {
        matches!(
            self,
            Operation::BulkCreate | Operation::BulkUpdate | Operation::BulkDelete
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed mutation as submitted by a caller. Lives for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub operation: Operation,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Field object for single-record operations; an array for bulk operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Caller-known prior state, used only when the remote fetch of it fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_data: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_context: Option<Value>,
}

impl MutationRequest {
    pub fn new(operation: Operation, table_id: impl Into<String>) -> Self {
        Self {
            operation,
            table_id: table_id.into(),
            record_id: None,
            payload: None,
            before_data: None,
            auth_context: None,
        }
    }

    pub fn create(table_id: impl Into<String>, fields: Fields) -> Self {
        Self::new(Operation::Create, table_id).with_payload(Value::Object(fields))
    }

    pub fn update(table_id: impl Into<String>, record_id: impl Into<String>, fields: Fields) -> Self {
        Self::new(Operation::Update, table_id)
            .with_record_id(record_id)
            .with_payload(Value::Object(fields))
    }

    pub fn delete(table_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(Operation::Delete, table_id).with_record_id(record_id)
    }

    pub fn bulk_create(table_id: impl Into<String>, records: Vec<Fields>) -> Self {
        let payload = Value::Array(records.into_iter().map(Value::Object).collect());
        Self::new(Operation::BulkCreate, table_id).with_payload(payload)
    }

    pub fn bulk_update(table_id: impl Into<String>, records: Vec<RecordUpdate>) -> Self {
        let payload = serde_json::to_value(records).unwrap_or(Value::Null);
        Self::new(Operation::BulkUpdate, table_id).with_payload(payload)
    }

    pub fn bulk_delete(table_id: impl Into<String>, record_ids: Vec<String>) -> Self {
        let payload = Value::Array(record_ids.into_iter().map(Value::String).collect());
        Self::new(Operation::BulkDelete, table_id).with_payload(payload)
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_auth_context(mut self, auth_context: Value) -> Self {
        self.auth_context = Some(auth_context);
        self
    }

    /// Record id component of the validation cache key.
    pub fn record_key(&self) -> &str {
        self.record_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(NEW_RECORD_KEY)
    }

    /// Parses the request into a typed plan. Malformed input is an `InputError`.
    pub fn plan(&self) -> Result<MutationPlan, GuardError> {
        if self.table_id.trim().is_empty() {
            return Err(GuardError::Input("tableId must not be empty".to_string()));
        }
        let plan = match self.operation {
            Operation::Create => MutationPlan::Create {
                fields: self.object_payload()?,
            },
            Operation::Update => MutationPlan::Update {
                record_id: self.required_record_id()?,
                fields: self.object_payload()?,
            },
            Operation::Delete => MutationPlan::Delete {
                record_id: self.required_record_id()?,
            },
            Operation::BulkCreate => MutationPlan::BulkCreate {
                records: self.array_payload()?,
            },
            Operation::BulkUpdate => {
                let records: Vec<RecordUpdate> = self.array_payload()?;
                if records.iter().any(|r| r.id.trim().is_empty()) {
                    return Err(GuardError::Input(
                        "bulk_update entries require a non-empty id".to_string(),
                    ));
                }
                MutationPlan::BulkUpdate { records }
            }
            Operation::BulkDelete => {
                let record_ids: Vec<String> = self.array_payload()?;
                if record_ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(GuardError::Input(
                        "bulk_delete record ids must not be empty".to_string(),
                    ));
                }
                MutationPlan::BulkDelete { record_ids }
            }
        };
        Ok(plan)
    }

    fn required_record_id(&self) -> Result<String, GuardError> {
        match self.record_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(GuardError::Input(format!(
                "recordId is required for {}",
                self.operation
            ))),
        }
    }

    fn object_payload(&self) -> Result<Fields, GuardError> {
        match &self.payload {
            None | Some(Value::Null) => Ok(Fields::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(GuardError::Input(format!(
                "payload for {} must be an object of fields",
                self.operation
            ))),
        }
    }

    fn array_payload<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>, GuardError> {
        match &self.payload {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v @ Value::Array(_)) => serde_json::from_value(v.clone()).map_err(|e| {
                GuardError::Input(format!("invalid payload for {}: {}", self.operation, e))
            }),
            Some(_) => Err(GuardError::Input(format!(
                "payload for {} must be an array",
                self.operation
            ))),
        }
    }
}

/// Typed form of a mutation, one variant per remote call shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationPlan {
    Create { fields: Fields },
    Update { record_id: String, fields: Fields },
    Delete { record_id: String },
    BulkCreate { records: Vec<Fields> },
    BulkUpdate { records: Vec<RecordUpdate> },
    BulkDelete { record_ids: Vec<String> },
}

impl MutationPlan {
    pub fn operation(&self) -> Operation {
        match self {
            MutationPlan::Create { .. } => Operation::Create,
            MutationPlan::Update { .. } => Operation::Update,
            MutationPlan::Delete { .. } => Operation::Delete,
            MutationPlan::BulkCreate { .. } => Operation::BulkCreate,
            MutationPlan::BulkUpdate { .. } => Operation::BulkUpdate,
            MutationPlan::BulkDelete { .. } => Operation::BulkDelete,
        }
    }

    /// Number of records touched by a bulk plan; `None` for single-record plans.
    pub fn batch_len(&self) -> Option<usize> {
        match self {
            MutationPlan::BulkCreate { records } => Some(records.len()),
            MutationPlan::BulkUpdate { records } => Some(records.len()),
            MutationPlan::BulkDelete { record_ids } => Some(record_ids.len()),
            _ => None,
        }
    }
}

/// A record as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

/// One element of a bulk update: record id plus the fields to set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

/// Remote table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Declared type of a remote field. Unrecognized types deserialize to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    SingleLineText,
    MultilineText,
    RichText,
    Email,
    Url,
    PhoneNumber,
    SingleSelect,
    MultipleSelects,
    Number,
    Currency,
    Percent,
    Rating,
    Duration,
    Checkbox,
    Date,
    DateTime,
    MultipleRecordLinks,
    MultipleAttachments,
    AutoNumber,
    CreatedTime,
    LastModifiedTime,
    CreatedBy,
    LastModifiedBy,
    Formula,
    Rollup,
    Lookup,
    MultipleLookupValues,
    Count,
    #[serde(other)]
    Other,
}

/// JSON shape a writable field value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    Date,
    Boolean,
}

impl FieldType {
    /// Values generated by the remote system; never required, never writable.
    pub fn is_computed(self) -> bool {
        matches!(
            self,
            FieldType::AutoNumber
                | FieldType::CreatedTime
                | FieldType::LastModifiedTime
                | FieldType::CreatedBy
                | FieldType::LastModifiedBy
                | FieldType::Formula
                | FieldType::Rollup
                | FieldType::Lookup
                | FieldType::MultipleLookupValues
                | FieldType::Count
        )
    }

    /// Basic type check category, `None` when the type is not checked.
    pub fn value_kind(self) -> Option<ValueKind> {
        match self {
            FieldType::Number
            | FieldType::Currency
            | FieldType::Percent
            | FieldType::Rating
            | FieldType::Duration => Some(ValueKind::Number),
            FieldType::SingleLineText
            | FieldType::MultilineText
            | FieldType::RichText
            | FieldType::Email
            | FieldType::Url
            | FieldType::PhoneNumber
            | FieldType::SingleSelect => Some(ValueKind::Text),
            FieldType::Date | FieldType::DateTime => Some(ValueKind::Date),
            FieldType::Checkbox => Some(ValueKind::Boolean),
            _ => None,
        }
    }
}

impl ValueKind {
    /// `null` always passes: clearing a field is not a type error.
    pub fn accepts(self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ValueKind::Number => value.is_number(),
            ValueKind::Text | ValueKind::Date => value.is_string(),
            ValueKind::Boolean => value.is_boolean(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::Date => "date string",
            ValueKind::Boolean => "boolean",
        }
    }
}

/// Which probes of a dry-run passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChecks {
    pub connectivity: bool,
    pub schema: bool,
}

/// Structured result of a dry-run. A failed verdict is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunVerdict {
    pub validated: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub checks: ValidationChecks,
    pub payload_hash: String,
}

/// Result of an executed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub transaction_id: String,
    pub operation: Operation,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub result: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Result of a successful undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub success: bool,
    pub transaction_id: String,
    pub undo_transaction_id: String,
    pub original_operation: Operation,
    pub undo_operation: Operation,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn empty_table_id_is_input_error() {
        let req = MutationRequest::create("  ", Fields::new());
        assert!(matches!(req.plan(), Err(GuardError::Input(_))));
    }

    #[test]
    fn update_without_record_id_is_input_error() {
        let req = MutationRequest::new(Operation::Update, "tbl").with_payload(json!({"a": 1}));
        let err = req.plan().unwrap_err();
        assert!(err.to_string().contains("recordId is required"));
    }

    #[test]
    fn bulk_payloads_parse_into_plans() {
        let req = MutationRequest::new(Operation::BulkUpdate, "tbl")
            .with_payload(json!([{ "id": "rec1", "fields": { "n": 1 } }]));
        assert_eq!(
            req.plan().unwrap(),
            MutationPlan::BulkUpdate {
                records: vec![RecordUpdate {
                    id: "rec1".to_string(),
                    fields: fields(json!({ "n": 1 })),
                }]
            }
        );

        let req = MutationRequest::bulk_delete("tbl", vec!["rec1".into(), "rec2".into()]);
        assert_eq!(req.plan().unwrap().batch_len(), Some(2));

        let bad = MutationRequest::new(Operation::BulkDelete, "tbl").with_payload(json!({"id": 1}));
        assert!(matches!(bad.plan(), Err(GuardError::Input(_))));
    }

    #[test]
    fn record_key_defaults_to_new() {
        assert_eq!(MutationRequest::create("t", Fields::new()).record_key(), "new");
        assert_eq!(MutationRequest::delete("t", "rec9").record_key(), "rec9");
    }

    #[test]
    fn unknown_field_types_deserialize_to_other() {
        let schema: FieldSchema =
            serde_json::from_value(json!({ "name": "x", "type": "barcode" })).unwrap();
        assert_eq!(schema.field_type, FieldType::Other);
        let schema: FieldSchema =
            serde_json::from_value(json!({ "name": "y", "type": "multipleLookupValues" }))
                .unwrap();
        assert!(schema.field_type.is_computed());
    }

    #[test]
    fn null_passes_every_value_kind() {
        for kind in [ValueKind::Number, ValueKind::Text, ValueKind::Date, ValueKind::Boolean] {
            assert!(kind.accepts(&Value::Null));
        }
        assert!(!ValueKind::Number.accepts(&json!("12")));
        assert!(ValueKind::Boolean.accepts(&json!(false)));
    }
}
