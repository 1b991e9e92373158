//! In-memory record API for tests: tables, schemas, injectable failures, call log.

use guard_types::{Fields, Record, RecordApi, RecordUpdate, RemoteError, TableSchema};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// One capability of the remote surface, used for failure injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CreateRecord,
    CreateRecords,
    UpdateRecord,
    UpdateRecords,
    DeleteRecord,
    DeleteRecords,
    GetRecord,
    ListRecords,
    GetSchema,
}

impl Capability {
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Capability::CreateRecord
                | Capability::CreateRecords
                | Capability::UpdateRecord
                | Capability::UpdateRecords
                | Capability::DeleteRecord
                | Capability::DeleteRecords
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub capability: Capability,
    pub table_id: String,
    pub record_ids: Vec<String>,
}

#[derive(Default)]
struct MockState {
    /// table_id -> records in insertion order.
    tables: HashMap<String, Vec<Record>>,
    schemas: HashMap<String, TableSchema>,
    failing: HashSet<Capability>,
    calls: Vec<RemoteCall>,
    next_id: u64,
}

impl MockState {
    fn table(&mut self, table_id: &str) -> Result<&mut Vec<Record>, RemoteError> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| RemoteError::NotFound(format!("table {}", table_id)))
    }

    fn enter(
        &mut self,
        capability: Capability,
        table_id: &str,
        record_ids: Vec<String>,
    ) -> Result<(), RemoteError> {
        self.calls.push(RemoteCall {
            capability,
            table_id: table_id.to_string(),
            record_ids,
        });
        if self.failing.contains(&capability) {
            return Err(RemoteError::Status {
                status: 503,
                body: format!("injected failure for {:?}", capability),
            });
        }
        Ok(())
    }

    fn insert(&mut self, table_id: &str, fields: &Fields) -> Result<Record, RemoteError> {
        self.next_id += 1;
        let record = Record {
            id: format!("rec{:014}", self.next_id),
            fields: fields.clone(),
            created_time: None,
        };
        self.table(table_id)?.push(record.clone());
        Ok(record)
    }

    fn patch(&mut self, table_id: &str, record_id: &str, fields: &Fields) -> Result<Record, RemoteError> {
        let record = self
            .table(table_id)?
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", table_id, record_id)))?;
        for (key, value) in fields {
            if value.is_null() {
                record.fields.remove(key);
            } else {
                record.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(record.clone())
    }

    fn remove(&mut self, table_id: &str, record_id: &str) -> Result<String, RemoteError> {
        let table = self.table(table_id)?;
        let pos = table
            .iter()
            .position(|r| r.id == record_id)
            .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", table_id, record_id)))?;
        Ok(table.remove(pos).id)
    }
}

/// Record API double. Tables must be registered before use; unknown tables are `NotFound`.
#[derive(Default)]
pub struct MockRecordApi {
    state: Mutex<MockState>,
}

impl MockRecordApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty table with `schema`.
    pub async fn add_table(&self, schema: TableSchema) {
        let mut state = self.state.lock().await;
        state.tables.entry(schema.id.clone()).or_default();
        state.schemas.insert(schema.id.clone(), schema);
    }

    /// Seeds a record without logging a call.
    pub async fn seed(&self, table_id: &str, fields: Fields) -> Result<Record, RemoteError> {
        self.state.lock().await.insert(table_id, &fields)
    }

    pub async fn records(&self, table_id: &str) -> Vec<Record> {
        self.state
            .lock()
            .await
            .tables
            .get(table_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn fail(&self, capability: Capability) {
        self.state.lock().await.failing.insert(capability);
    }

    pub async fn recover(&self, capability: Capability) {
        self.state.lock().await.failing.remove(&capability);
    }

    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls that would have changed remote state.
    pub async fn mutation_calls(&self) -> Vec<RemoteCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.capability.is_mutation())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait::async_trait]
impl RecordApi for MockRecordApi {
    async fn create_record(&self, table_id: &str, fields: &Fields) -> Result<Record, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::CreateRecord, table_id, Vec::new())?;
        state.insert(table_id, fields)
    }

    async fn create_records(
        &self,
        table_id: &str,
        records: &[Fields],
    ) -> Result<Vec<Record>, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::CreateRecords, table_id, Vec::new())?;
        records
            .iter()
            .map(|fields| state.insert(table_id, fields))
            .collect()
    }

    async fn update_record(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &Fields,
    ) -> Result<Record, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::UpdateRecord, table_id, vec![record_id.to_string()])?;
        state.patch(table_id, record_id, fields)
    }

    async fn update_records(
        &self,
        table_id: &str,
        records: &[RecordUpdate],
    ) -> Result<Vec<Record>, RemoteError> {
        let mut state = self.state.lock().await;
        let ids = records.iter().map(|r| r.id.clone()).collect();
        state.enter(Capability::UpdateRecords, table_id, ids)?;
        records
            .iter()
            .map(|r| state.patch(table_id, &r.id, &r.fields))
            .collect()
    }

    async fn delete_record(&self, table_id: &str, record_id: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::DeleteRecord, table_id, vec![record_id.to_string()])?;
        state.remove(table_id, record_id)
    }

    async fn delete_records(
        &self,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::DeleteRecords, table_id, record_ids.to_vec())?;
        record_ids
            .iter()
            .map(|id| state.remove(table_id, id))
            .collect()
    }

    async fn get_record(&self, table_id: &str, record_id: &str) -> Result<Record, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::GetRecord, table_id, vec![record_id.to_string()])?;
        state
            .table(table_id)?
            .iter()
            .find(|r| r.id == record_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", table_id, record_id)))
    }

    async fn list_records(
        &self,
        table_id: &str,
        max_records: usize,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::ListRecords, table_id, Vec::new())?;
        Ok(state
            .table(table_id)?
            .iter()
            .take(max_records)
            .cloned()
            .collect())
    }

    async fn get_schema(&self, table_id: &str) -> Result<TableSchema, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter(Capability::GetSchema, table_id, Vec::new())?;
        state
            .schemas
            .get(table_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("schema for table {}", table_id)))
    }
}
