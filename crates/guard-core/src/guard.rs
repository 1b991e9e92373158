//! Caller-facing facade: dry-run, gated execute, undo and audit queries.

use crate::{
    DryRunValidator, GatePolicy, GuardConfig, InMemoryTokenStore, MutationExecutor, MutationGate,
    UndoEngine, ValidationCache,
};
use guard_audit::{verify_integrity, ComplianceReport, ComplianceStandard, IntegrityReport};
use guard_types::{
    AuditEntry, AuditListOptions, AuditStore, Clock, DryRunVerdict, GuardError, MutationOutcome,
    MutationRequest, RecordApi, SystemClock, TokenStore, UndoOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result of [`MutationGuard::perform`], tagged by which path ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GuardResponse {
    DryRun(DryRunVerdict),
    Executed(MutationOutcome),
}

pub struct MutationGuardBuilder {
    api: Arc<dyn RecordApi>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenStore>,
    config: GuardConfig,
    policy: GatePolicy,
}

impl MutationGuardBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gate_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> MutationGuard {
        let config = Arc::new(self.config);
        let cache = Arc::new(ValidationCache::new(
            self.tokens,
            self.clock.clone(),
            config.validation_ttl,
        ));
        MutationGuard {
            validator: DryRunValidator::new(self.api.clone(), cache.clone(), config.clone()),
            gate: MutationGate::new(cache.clone()).with_policy(self.policy),
            executor: MutationExecutor::new(
                self.api.clone(),
                self.audit.clone(),
                self.clock.clone(),
                config.clone(),
            ),
            undo: UndoEngine::new(self.api, self.audit.clone(), self.clock.clone(), config.clone()),
            cache,
            audit: self.audit,
            clock: self.clock,
            config,
        }
    }
}

pub struct MutationGuard {
    validator: DryRunValidator,
    gate: MutationGate,
    executor: MutationExecutor,
    undo: UndoEngine,
    cache: Arc<ValidationCache>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GuardConfig>,
}

impl MutationGuard {
    /// Builder with the system clock, an in-memory token store and default config.
    pub fn builder(api: Arc<dyn RecordApi>, audit: Arc<dyn AuditStore>) -> MutationGuardBuilder {
        MutationGuardBuilder {
            api,
            audit,
            clock: Arc::new(SystemClock),
            tokens: Arc::new(InMemoryTokenStore::new()),
            config: GuardConfig::default(),
            policy: GatePolicy::Enforce,
        }
    }

    /// Single entry point for mutating calls. The dry-run flag is mandatory:
    /// `None` is rejected, never defaulted.
    pub async fn perform(
        &self,
        req: &MutationRequest,
        dry_run: Option<bool>,
    ) -> Result<GuardResponse, GuardError> {
        match dry_run {
            None => Err(GuardError::Input(
                "dryRun must be set explicitly to true or false".to_string(),
            )),
            Some(true) => Ok(GuardResponse::DryRun(self.perform_dry_run(req).await?)),
            Some(false) => Ok(GuardResponse::Executed(self.perform_mutation(req).await?)),
        }
    }

    pub async fn perform_dry_run(&self, req: &MutationRequest) -> Result<DryRunVerdict, GuardError> {
        self.validator.validate(req).await
    }

    /// Executes `req` if a fresh, passing dry-run of the identical request exists.
    pub async fn perform_mutation(
        &self,
        req: &MutationRequest,
    ) -> Result<MutationOutcome, GuardError> {
        // Malformed input is rejected before it can consume a token.
        req.plan()?;
        self.gate.authorize(req).await?;
        self.executor.execute(req).await
    }

    pub async fn undo(
        &self,
        transaction_id: &str,
        auth_context: Option<Value>,
    ) -> Result<UndoOutcome, GuardError> {
        self.undo.undo(transaction_id, auth_context).await
    }

    pub async fn generate_report(
        &self,
        standard: ComplianceStandard,
    ) -> Result<ComplianceReport, GuardError> {
        let entries = self.audit.read_all().await?;
        Ok(guard_audit::generate_report(
            &entries,
            standard,
            &self.config.personal_data_fields,
            self.clock.now(),
        ))
    }

    pub async fn verify_audit(&self) -> Result<IntegrityReport, GuardError> {
        Ok(verify_integrity(self.audit.as_ref()).await?)
    }

    pub async fn history(&self, opts: &AuditListOptions) -> Result<Vec<AuditEntry>, GuardError> {
        Ok(self.audit.list(opts).await?)
    }

    pub async fn transaction(&self, id: &str) -> Result<Option<AuditEntry>, GuardError> {
        Ok(self.audit.find(id).await?)
    }

    /// Drops every pending dry-run.
    pub async fn reset_validations(&self) -> Result<(), GuardError> {
        Ok(self.cache.reset().await?)
    }

    pub async fn pending_validations(&self) -> Result<usize, GuardError> {
        Ok(self.cache.len().await?)
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_audit::InMemoryAuditStore;
    use guard_remote::MockRecordApi;
    use guard_types::{Fields, GateViolation, TableSchema};
    use serde_json::json;

    async fn guard() -> (Arc<MockRecordApi>, MutationGuard) {
        let api = Arc::new(MockRecordApi::new());
        api.add_table(TableSchema {
            id: "users".to_string(),
            name: "Users".to_string(),
            fields: Vec::new(),
        })
        .await;
        let guard = MutationGuard::builder(api.clone(), Arc::new(InMemoryAuditStore::new())).build();
        (api, guard)
    }

    #[tokio::test]
    async fn missing_dry_run_flag_is_input_error() {
        let (api, guard) = guard().await;
        let req = MutationRequest::create("users", Fields::new());
        assert!(matches!(
            guard.perform(&req, None).await,
            Err(GuardError::Input(_))
        ));
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn perform_routes_by_flag() {
        let (_, guard) = guard().await;
        let req = MutationRequest::create("users", Fields::new());
        let first = guard.perform(&req, Some(true)).await.unwrap();
        assert!(matches!(first, GuardResponse::DryRun(ref v) if v.validated));
        let second = guard.perform(&req, Some(false)).await.unwrap();
        let GuardResponse::Executed(outcome) = second else {
            panic!("expected execution");
        };
        assert!(outcome.transaction_id.starts_with("audit-"));
        assert_eq!(
            serde_json::to_value(GuardResponse::Executed(outcome)).unwrap()["mode"],
            json!("executed")
        );
    }

    #[tokio::test]
    async fn malformed_execute_keeps_pending_token() {
        let (_, guard) = guard().await;
        let req = MutationRequest::update("users", "rec1", Fields::new());
        guard.perform_dry_run(&req).await.unwrap();
        let mut broken = req.clone();
        broken.record_id = None;
        assert!(matches!(
            guard.perform_mutation(&broken).await,
            Err(GuardError::Input(_))
        ));
        assert_eq!(guard.pending_validations().await.unwrap(), 1);
        guard.reset_validations().await.unwrap();
        assert!(matches!(
            guard.perform_mutation(&req).await,
            Err(GuardError::Gate(GateViolation::NoDryRun))
        ));
    }
}
