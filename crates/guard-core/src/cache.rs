//! Validation cache: short-lived record of "this exact operation was just validated".

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use guard_types::{
    CacheKey, Clock, DryRunVerdict, TokenStore, TokenStoreError, ValidationToken,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-local token store. `take` removes under the same lock that finds the token.
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<CacheKey, ValidationToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: ValidationToken) -> Result<(), TokenStoreError> {
        self.tokens.lock().await.insert(token.key.clone(), token);
        Ok(())
    }

    async fn take(&self, key: &CacheKey) -> Result<Option<ValidationToken>, TokenStoreError> {
        Ok(self.tokens.lock().await.remove(key))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, TokenStoreError> {
        let mut guard = self.tokens.lock().await;
        let before = guard.len();
        guard.retain(|_, t| t.created_at >= cutoff);
        Ok(before - guard.len())
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        self.tokens.lock().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, TokenStoreError> {
        Ok(self.tokens.lock().await.len())
    }
}

/// Dry-run verdicts awaiting a matching execute.
///
/// Constructed once and shared by the validator (writer) and the gate (consumer).
/// At most one token lives per key; a newer dry-run replaces the older one.
pub struct ValidationCache {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ValidationCache {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `verdict` under `key`, replacing any previous token, and drops expired tokens.
    pub async fn record(
        &self,
        key: CacheKey,
        verdict: &DryRunVerdict,
    ) -> Result<ValidationToken, TokenStoreError> {
        let now = self.clock.now();
        let purged = self.store.purge_older_than(now - self.ttl).await?;
        if purged > 0 {
            tracing::debug!(purged, "dropped expired validation tokens");
        }
        let token = ValidationToken {
            payload_hash: key.payload_hash.clone(),
            key,
            created_at: now,
            validated: verdict.validated,
            errors: verdict.errors.clone(),
        };
        self.store.insert(token.clone()).await?;
        Ok(token)
    }

    /// Removes and returns the token under `key`, whatever its state.
    pub async fn take(&self, key: &CacheKey) -> Result<Option<ValidationToken>, TokenStoreError> {
        self.store.take(key).await
    }

    pub fn is_expired(&self, token: &ValidationToken) -> bool {
        token.is_expired(self.clock.now(), self.ttl)
    }

    /// Forgets every pending validation.
    pub async fn reset(&self) -> Result<(), TokenStoreError> {
        self.store.clear().await
    }

    pub async fn len(&self) -> Result<usize, TokenStoreError> {
        self.store.len().await
    }
}
