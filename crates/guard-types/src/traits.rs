//! Traits for the remote record API and the guard's own storage backends.

use crate::{
    AuditEntry, AuditListOptions, AuditScan, AuditStoreError, CacheKey, Fields, Record,
    RecordUpdate, RemoteError, TableSchema, TokenStoreError, ValidationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Capability surface of the remote record-management API.
#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn create_record(&self, table_id: &str, fields: &Fields) -> Result<Record, RemoteError>;

    async fn create_records(
        &self,
        table_id: &str,
        records: &[Fields],
    ) -> Result<Vec<Record>, RemoteError>;

    async fn update_record(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &Fields,
    ) -> Result<Record, RemoteError>;

    async fn update_records(
        &self,
        table_id: &str,
        records: &[RecordUpdate],
    ) -> Result<Vec<Record>, RemoteError>;

    /// Returns the id of the deleted record.
    async fn delete_record(&self, table_id: &str, record_id: &str) -> Result<String, RemoteError>;

    async fn delete_records(
        &self,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<Vec<String>, RemoteError>;

    async fn get_record(&self, table_id: &str, record_id: &str) -> Result<Record, RemoteError>;

    async fn list_records(
        &self,
        table_id: &str,
        max_records: usize,
    ) -> Result<Vec<Record>, RemoteError>;

    async fn get_schema(&self, table_id: &str) -> Result<TableSchema, RemoteError>;
}

/// Append-only log of executed mutations.
///
/// Implementations must seal (hash) each entry on append and never rewrite
/// existing content.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Fails when the store cannot currently accept appends.
    ///
    /// Called before a remote mutation so an unwritable log stops the mutation
    /// instead of leaving it unaudited.
    async fn ready(&self) -> Result<(), AuditStoreError> {
        Ok(())
    }

    /// Seals and appends one entry; returns the entry as persisted.
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry, AuditStoreError>;

    /// Reads the whole log in append order, skipping unreadable entries.
    async fn scan(&self) -> Result<AuditScan, AuditStoreError>;

    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditStoreError> {
        Ok(self.scan().await?.entries)
    }

    async fn find(&self, id: &str) -> Result<Option<AuditEntry>, AuditStoreError> {
        Ok(self.read_all().await?.into_iter().find(|e| e.id == id))
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEntry>, AuditStoreError> {
        Ok(opts.apply(self.read_all().await?))
    }
}

/// Backing storage for validation tokens.
///
/// `take` must remove and return atomically so a token is consumed at most once.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Inserts, replacing any token under the same key.
    async fn insert(&self, token: ValidationToken) -> Result<(), TokenStoreError>;

    async fn take(&self, key: &CacheKey) -> Result<Option<ValidationToken>, TokenStoreError>;

    /// Drops tokens created before `cutoff`; returns how many were dropped.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, TokenStoreError>;

    async fn clear(&self) -> Result<(), TokenStoreError>;

    async fn len(&self) -> Result<usize, TokenStoreError>;
}
