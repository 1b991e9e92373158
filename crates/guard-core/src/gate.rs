//! Enforcement point between a dry-run and the real mutation.

use crate::ValidationCache;
use guard_types::{CacheKey, GateViolation, GuardError, MutationRequest};
use std::sync::Arc;

/// Whether the gate checks tokens. The bypass only exists in test builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatePolicy {
    #[default]
    Enforce,
    #[cfg(any(test, feature = "test-util"))]
    BypassForTests,
}

pub struct MutationGate {
    cache: Arc<ValidationCache>,
    policy: GatePolicy,
}

impl MutationGate {
    pub fn new(cache: Arc<ValidationCache>) -> Self {
        Self {
            cache,
            policy: GatePolicy::Enforce,
        }
    }

    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Consumes the dry-run token for `req`, or rejects the execute.
    ///
    /// The token is removed before it is inspected, so every outcome (pass or
    /// any violation) leaves no token behind and a token authorizes at most once.
    pub async fn authorize(&self, req: &MutationRequest) -> Result<(), GuardError> {
        #[cfg(any(test, feature = "test-util"))]
        if self.policy == GatePolicy::BypassForTests {
            tracing::warn!(operation = %req.operation, table_id = %req.table_id, "gate bypassed");
            return Ok(());
        }

        let key = CacheKey::for_request(req);
        let Some(token) = self.cache.take(&key).await? else {
            tracing::debug!(key = %key, "no dry-run token");
            return Err(GateViolation::NoDryRun.into());
        };
        if self.cache.is_expired(&token) {
            tracing::debug!(key = %key, created_at = %token.created_at, "dry-run token expired");
            return Err(GateViolation::Expired.into());
        }
        if token.payload_hash != key.payload_hash {
            return Err(GateViolation::DataMismatch.into());
        }
        if !token.validated {
            return Err(GateViolation::ValidationFailed {
                errors: token.errors,
            }
            .into());
        }
        tracing::debug!(key = %key, "dry-run token consumed");
        Ok(())
    }
}
