//! Compliance reports aggregated over audit history.

use chrono::{DateTime, Utc};
use guard_types::{AuditEntry, Operation, Reversal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field-name fragments treated as personal data unless configured otherwise.
pub const DEFAULT_PERSONAL_DATA_FIELDS: &[&str] =
    &["name", "email", "phone", "address", "ssn", "passport", "dob"];

const PERSONAL_DATA_NOTE: &str = "personal-data detection matches field names against configured \
     fragments; it is a heuristic and neither complete nor free of false positives";

const ERASURE_NOTE: &str = "erasure candidates are deletions whose reversal recreates the record: \
     the deleted values are still retained in this audit log (beforeData and reversal payload) \
     and remain recoverable until the log is redacted by an external retention process";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStandard {
    #[serde(rename = "SOC2")]
    Soc2,
    #[serde(rename = "GDPR")]
    Gdpr,
}

impl ComplianceStandard {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceStandard::Soc2 => "SOC2",
            ComplianceStandard::Gdpr => "GDPR",
        }
    }
}

impl std::str::FromStr for ComplianceStandard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SOC2" => Ok(ComplianceStandard::Soc2),
            "GDPR" => Ok(ComplianceStandard::Gdpr),
            other => Err(format!("unknown compliance standard: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An audit entry whose payload or prior state names personal-data fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalDataHit {
    pub transaction_id: String,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureCandidate {
    pub transaction_id: String,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Whether the deleted values are present in the log.
    pub data_retained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub standard: ComplianceStandard,
    pub generated_at: DateTime<Utc>,
    pub total_operations: usize,
    pub operations_by_type: BTreeMap<Operation, usize>,
    /// In first-seen order.
    pub affected_tables: Vec<String>,
    pub date_range: Option<DateRange>,
    pub undo_operations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_data: Option<Vec<PersonalDataHit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_candidates: Option<Vec<ErasureCandidate>>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Aggregates `entries` (in log order) into a report for `standard`.
///
/// `fragments` are case-insensitive substrings of field names; they are only
/// consulted for GDPR.
pub fn generate_report(
    entries: &[AuditEntry],
    standard: ComplianceStandard,
    fragments: &[String],
    generated_at: DateTime<Utc>,
) -> ComplianceReport {
    let mut operations_by_type: BTreeMap<Operation, usize> = BTreeMap::new();
    let mut affected_tables: Vec<String> = Vec::new();
    let mut date_range: Option<DateRange> = None;
    let mut undo_operations = 0;

    for entry in entries {
        *operations_by_type.entry(entry.operation).or_default() += 1;
        if !affected_tables.contains(&entry.table_id) {
            affected_tables.push(entry.table_id.clone());
        }
        date_range = Some(match date_range {
            None => DateRange {
                start: entry.timestamp,
                end: entry.timestamp,
            },
            Some(r) => DateRange {
                start: r.start.min(entry.timestamp),
                end: r.end.max(entry.timestamp),
            },
        });
        if entry.is_undo() {
            undo_operations += 1;
        }
    }

    let mut report = ComplianceReport {
        standard,
        generated_at,
        total_operations: entries.len(),
        operations_by_type,
        affected_tables,
        date_range,
        undo_operations,
        personal_data: None,
        erasure_candidates: None,
        notes: Vec::new(),
    };

    if standard == ComplianceStandard::Gdpr {
        let hits = entries
            .iter()
            .filter_map(|entry| {
                let fields = personal_data_fields(entry, fragments);
                (!fields.is_empty()).then(|| PersonalDataHit {
                    transaction_id: entry.id.clone(),
                    table_id: entry.table_id.clone(),
                    record_id: entry.record_id.clone(),
                    fields,
                })
            })
            .collect();
        let candidates = entries
            .iter()
            .filter(|entry| is_erasure_candidate(entry))
            .map(|entry| ErasureCandidate {
                transaction_id: entry.id.clone(),
                table_id: entry.table_id.clone(),
                record_id: entry.record_id.clone(),
                timestamp: entry.timestamp,
                data_retained: entry.before_data.as_ref().is_some_and(|v| !v.is_null()),
            })
            .collect();
        report.personal_data = Some(hits);
        report.erasure_candidates = Some(candidates);
        report.notes.push(PERSONAL_DATA_NOTE.to_string());
        report.notes.push(ERASURE_NOTE.to_string());
    }

    report
}

/// Deletions whose reversal recreates the deleted data.
fn is_erasure_candidate(entry: &AuditEntry) -> bool {
    matches!(entry.operation, Operation::Delete | Operation::BulkDelete)
        && matches!(
            &entry.reversal_instructions,
            Some(Reversal::Replay(r))
                if matches!(r.operation, Operation::Create | Operation::BulkCreate)
        )
}

/// Field names in the entry's payload or before-data that match a personal-data fragment.
///
/// Sorted and deduplicated.
pub fn personal_data_fields(entry: &AuditEntry, fragments: &[String]) -> Vec<String> {
    let fragments: Vec<String> = fragments
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    let mut names = Vec::new();
    for value in [&entry.payload, &entry.before_data].into_iter().flatten() {
        collect_keys(value, &mut names);
    }
    let mut hits: Vec<String> = names
        .into_iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            fragments.iter().any(|f| lower.contains(f.as_str()))
        })
        .collect();
    hits.sort();
    hits.dedup();
    hits
}

fn collect_keys(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                out.push(key.clone());
                collect_keys(item, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_keys(item, out);
            }
        }
        _ => {}
    }
}
