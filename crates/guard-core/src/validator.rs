//! Dry-run validation: probe the remote table and check the payload against its schema.

use crate::{GuardConfig, ValidationCache};
use guard_types::{
    CacheKey, DryRunVerdict, Fields, GuardError, MutationPlan, MutationRequest, RecordApi,
    TableSchema, ValidationChecks,
};
use serde_json::Value;
use std::sync::Arc;

pub struct DryRunValidator {
    api: Arc<dyn RecordApi>,
    cache: Arc<ValidationCache>,
    config: Arc<GuardConfig>,
}

impl DryRunValidator {
    pub fn new(api: Arc<dyn RecordApi>, cache: Arc<ValidationCache>, config: Arc<GuardConfig>) -> Self {
        Self { api, cache, config }
    }

    /// Validates `req` without mutating anything and records the verdict in the cache.
    ///
    /// A failed validation is returned as a verdict with `validated = false`;
    /// only malformed input is an error.
    pub async fn validate(&self, req: &MutationRequest) -> Result<DryRunVerdict, GuardError> {
        let plan = req.plan()?;
        let key = CacheKey::for_request(req);
        let mut verdict = DryRunVerdict {
            validated: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            checks: ValidationChecks::default(),
            payload_hash: key.payload_hash.clone(),
        };

        match self.api.list_records(&req.table_id, 1).await {
            Ok(_) => verdict.checks.connectivity = true,
            Err(e) => verdict.errors.push(format!(
                "connectivity check failed for table {}: {}",
                req.table_id, e
            )),
        }

        if verdict.checks.connectivity {
            let errors = self.check_plan(&req.table_id, &plan).await;
            verdict.checks.schema = errors.is_empty();
            verdict.errors.extend(errors);
            verdict.warnings = plan_warnings(&plan);
        }
        verdict.validated = verdict.errors.is_empty();

        self.cache.record(key.clone(), &verdict).await?;
        tracing::debug!(
            key = %key,
            validated = verdict.validated,
            errors = verdict.errors.len(),
            "dry-run recorded"
        );
        Ok(verdict)
    }

    async fn check_plan(&self, table_id: &str, plan: &MutationPlan) -> Vec<String> {
        if let Some(n) = plan.batch_len() {
            let max = self.config.bulk_max_records;
            if n == 0 || n > max {
                return vec![format!(
                    "{} requires between 1 and {} records, got {}",
                    plan.operation(),
                    max,
                    n
                )];
            }
        }
        let batch: Vec<(&Fields, bool)> = match plan {
            MutationPlan::Create { fields } => vec![(fields, true)],
            MutationPlan::Update { fields, .. } => vec![(fields, false)],
            MutationPlan::BulkCreate { records } => records.iter().map(|f| (f, true)).collect(),
            MutationPlan::BulkUpdate { records } => {
                records.iter().map(|r| (&r.fields, false)).collect()
            }
            MutationPlan::Delete { .. } | MutationPlan::BulkDelete { .. } => return Vec::new(),
        };
        let schema = match self.api.get_schema(table_id).await {
            Ok(schema) => schema,
            Err(e) => return vec![format!("schema unavailable for table {}: {}", table_id, e)],
        };
        if plan.batch_len().is_none() {
            let (fields, is_create) = batch[0];
            return self.schema_errors(&schema, fields, is_create);
        }
        batch
            .into_iter()
            .enumerate()
            .flat_map(|(i, (fields, is_create))| {
                self.schema_errors(&schema, fields, is_create)
                    .into_iter()
                    .map(move |e| format!("record {}: {}", i, e))
            })
            .collect()
    }

    fn schema_errors(&self, schema: &TableSchema, fields: &Fields, is_create: bool) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, value) in fields {
            if self.config.is_system_field(name) {
                errors.push(format!("field '{}' is system-reserved and cannot be set", name));
                continue;
            }
            let Some(field) = schema.field(name) else {
                errors.push(format!(
                    "unknown field '{}' is not in the schema of table {}",
                    name, schema.id
                ));
                continue;
            };
            if field.field_type.is_computed() {
                errors.push(format!(
                    "field '{}' is computed by the remote system and cannot be set",
                    name
                ));
                continue;
            }
            if let Some(kind) = field.field_type.value_kind() {
                if !kind.accepts(value) {
                    errors.push(format!(
                        "field '{}' expects a {} value, got {}",
                        name,
                        kind.as_str(),
                        json_type(value)
                    ));
                }
            }
        }
        if is_create {
            for field in schema
                .fields
                .iter()
                .filter(|f| f.required && !f.field_type.is_computed())
            {
                if fields.get(&field.name).map_or(true, Value::is_null) {
                    errors.push(format!("required field '{}' is missing", field.name));
                }
            }
        }
        errors
    }
}

fn plan_warnings(plan: &MutationPlan) -> Vec<String> {
    match plan {
        MutationPlan::Update { fields, .. } if fields.is_empty() => {
            vec!["update payload is empty; the record will not change".to_string()]
        }
        MutationPlan::Delete { .. } | MutationPlan::BulkDelete { .. } => vec![
            "deleted values are kept in the audit log so the deletion can be undone".to_string(),
        ],
        _ => Vec::new(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
