//! Tunables for validation, undo and reporting.

use chrono::Duration;
use guard_audit::DEFAULT_PERSONAL_DATA_FIELDS;

/// Field names the remote system owns; callers may never set them.
pub const DEFAULT_SYSTEM_FIELDS: &[&str] = &[
    "id",
    "createdTime",
    "lastModifiedTime",
    "createdBy",
    "lastModifiedBy",
];

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// How long a dry-run stays valid for the matching execute.
    pub validation_ttl: Duration,
    /// Maximum age of an audit entry that may still be undone.
    pub undo_window: Duration,
    /// Upper bound on records per bulk operation (lower bound is 1).
    pub bulk_max_records: usize,
    pub system_fields: Vec<String>,
    /// Lowercase fragments of field names treated as personal data in GDPR reports.
    pub personal_data_fields: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            validation_ttl: Duration::minutes(5),
            undo_window: Duration::days(30),
            bulk_max_records: 10,
            system_fields: to_strings(DEFAULT_SYSTEM_FIELDS),
            personal_data_fields: to_strings(DEFAULT_PERSONAL_DATA_FIELDS),
        }
    }
}

impl GuardConfig {
    /// Defaults overridden by `GUARD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            validation_ttl: env_parse::<i64>("GUARD_VALIDATION_TTL_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.validation_ttl),
            undo_window: env_parse::<i64>("GUARD_UNDO_WINDOW_DAYS")
                .map(Duration::days)
                .unwrap_or(defaults.undo_window),
            bulk_max_records: env_parse("GUARD_BULK_MAX_RECORDS")
                .unwrap_or(defaults.bulk_max_records),
            system_fields: env_list("GUARD_SYSTEM_FIELDS").unwrap_or(defaults.system_fields),
            personal_data_fields: env_list("GUARD_PERSONAL_DATA_FIELDS")
                .unwrap_or(defaults.personal_data_fields),
        }
    }

    pub fn is_system_field(&self, name: &str) -> bool {
        self.system_fields.iter().any(|f| f == name)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    Some(parse_list(&raw))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
