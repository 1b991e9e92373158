//! Audit store implementations and the reports derived from audit history.

mod jsonl;
mod memory;
mod report;
mod verify;

pub use guard_types::{AuditEntry, AuditListOptions, AuditScan, AuditStore, AuditStoreError};
pub use jsonl::JsonlAuditStore;
pub use memory::InMemoryAuditStore;
pub use report::{
    generate_report, personal_data_fields, ComplianceReport, ComplianceStandard, DateRange,
    ErasureCandidate, PersonalDataHit, DEFAULT_PERSONAL_DATA_FIELDS,
};
pub use verify::{verify_integrity, IntegrityReport};
