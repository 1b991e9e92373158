//! JSONL file-backed audit store (persists across restarts).
//!
//! One sealed entry per line. Appends open the file in append mode and write a
//! single line, so history size never affects write cost. A legacy whole-file
//! JSON array store is migrated once, on first access, and every migrated entry
//! is resealed. A legacy file that does not parse is renamed to `.corrupt`.

use async_trait::async_trait;
use guard_types::{AuditEntry, AuditScan, AuditStore, AuditStoreError};
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

pub struct JsonlAuditStore {
    path: PathBuf,
    legacy_path: PathBuf,
    sync_on_append: bool,
    migrated: OnceCell<()>,
}

impl JsonlAuditStore {
    /// Store at `path`; the legacy array file is looked up next to it with a `.json` extension.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let legacy_path = path.with_extension("json");
        Self {
            path,
            legacy_path,
            sync_on_append: true,
            migrated: OnceCell::new(),
        }
    }

    pub fn with_legacy_path(mut self, legacy_path: impl AsRef<Path>) -> Self {
        self.legacy_path = legacy_path.as_ref().to_path_buf();
        self
    }

    /// Whether each append waits for `fsync` of the data (default true).
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_migrated(&self) -> Result<(), AuditStoreError> {
        self.migrated
            .get_or_try_init(|| self.migrate_legacy())
            .await
            .map(|_| ())
    }

    async fn migrate_legacy(&self) -> Result<(), AuditStoreError> {
        if tokio::fs::try_exists(&self.path).await?
            || !tokio::fs::try_exists(&self.legacy_path).await?
        {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&self.legacy_path).await?;
        let items: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                let corrupt = self.sibling_of_legacy(".corrupt");
                tracing::warn!(
                    legacy = %self.legacy_path.display(),
                    moved_to = %corrupt.to_string_lossy(),
                    error = %e,
                    "legacy audit log is not a JSON array; setting it aside"
                );
                tokio::fs::rename(&self.legacy_path, &corrupt).await?;
                return Ok(());
            }
        };
        let total = items.len();

        let mut out = String::new();
        let mut migrated = 0usize;
        let mut rehashed = 0usize;
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<AuditEntry>(upgrade_legacy_entry(item)) {
                Ok(entry) => {
                    let previous = entry.hash.clone();
                    let entry = entry.seal();
                    if !previous.is_empty() && previous != entry.hash {
                        rehashed += 1;
                    }
                    out.push_str(&serde_json::to_string(&entry)?);
                    out.push('\n');
                    migrated += 1;
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping unreadable legacy audit entry");
                }
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, out.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tokio::fs::rename(&self.legacy_path, self.sibling_of_legacy(".backup")).await?;

        tracing::info!(
            legacy = %self.legacy_path.display(),
            path = %self.path.display(),
            migrated,
            rehashed,
            total,
            "migrated legacy audit log"
        );
        Ok(())
    }

    fn sibling_of_legacy(&self, suffix: &str) -> OsString {
        let mut name: OsString = self.legacy_path.clone().into_os_string();
        name.push(suffix);
        name
    }
}

/// Legacy entries predate the tagged reversal format; plain instructions are replays.
fn upgrade_legacy_entry(mut item: Value) -> Value {
    if let Some(Value::Object(reversal)) = item.get_mut("reversalInstructions") {
        if !reversal.contains_key("kind") {
            reversal.insert("kind".to_string(), Value::String("replay".to_string()));
        }
    }
    item
}

/// Parses a JSONL buffer line by line; unreadable lines are logged and skipped.
pub(crate) fn parse_lines(content: &[u8]) -> AuditScan {
    let mut scan = AuditScan::default();
    for (index, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(line) {
            Ok(entry) => scan.entries.push(entry),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping unreadable audit line");
                scan.skipped_lines += 1;
            }
        }
    }
    scan
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn ready(&self) -> Result<(), AuditStoreError> {
        self.ensure_migrated().await?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry, AuditStoreError> {
        self.ensure_migrated().await?;
        let entry = entry.seal();
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        if self.sync_on_append {
            f.sync_data().await?;
        }
        Ok(entry)
    }

    async fn scan(&self) -> Result<AuditScan, AuditStoreError> {
        self.ensure_migrated().await?;
        let content = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AuditScan::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_lines(&content))
    }
}
