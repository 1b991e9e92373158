//! Safety layer for mutations against a remote record API.
//!
//! A mutation runs only after a fresh dry-run of the byte-identical request
//! ([`DryRunValidator`] then [`MutationGate`]); every executed mutation is
//! appended to the audit log with instructions to reverse it
//! ([`MutationExecutor`]); and any audited mutation can be replayed backwards
//! within the undo window ([`UndoEngine`]). [`MutationGuard`] wires them together.

mod cache;
mod config;
mod executor;
mod gate;
mod guard;
mod undo;
mod validator;

pub use cache::{InMemoryTokenStore, ValidationCache};
pub use config::GuardConfig;
pub use executor::MutationExecutor;
pub use gate::{GatePolicy, MutationGate};
pub use guard::{GuardResponse, MutationGuard, MutationGuardBuilder};
pub use undo::UndoEngine;
pub use validator::DryRunValidator;

pub use guard_audit::{ComplianceReport, ComplianceStandard, IntegrityReport};
pub use guard_types::*;
