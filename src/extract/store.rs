//! Emission record persistence keyed by (company, year).
//!
//! An upsert on an existing key overwrites every measurement field, keeps
//! the original `created_at` and bumps `updated_at`.

use crate::error::EsgError;
use crate::model::EmissionRecord;
use crate::pipeline::manifest::write_json;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

type Key = (String, i32);

/// Where merged emission records end up.
#[async_trait]
pub trait EmissionStore: Send + Sync {
    /// Insert or replace the record for its (company, year); returns the stored row.
    async fn upsert(&self, record: EmissionRecord) -> Result<EmissionRecord, EsgError>;

    async fn get(&self, company: &str, year: i32) -> Result<Option<EmissionRecord>, EsgError>;

    /// Every record of `company`, oldest year first.
    async fn list(&self, company: &str) -> Result<Vec<EmissionRecord>, EsgError>;
}

fn merge_into(rows: &mut BTreeMap<Key, EmissionRecord>, mut record: EmissionRecord) -> EmissionRecord {
    if let Some(existing) = rows.get(&record.key()) {
        record.created_at = existing.created_at;
        record.updated_at = Utc::now().max(existing.updated_at);
        debug!("Updating {} {}", record.company_name, record.year);
    }
    rows.insert(record.key(), record.clone());
    record
}

fn company_rows(rows: &BTreeMap<Key, EmissionRecord>, company: &str) -> Vec<EmissionRecord> {
    rows.values().filter(|r| r.company_name == company).cloned().collect()
}

/// In-memory store for tests and one-off runs.
#[derive(Default)]
pub struct MemoryEmissionStore {
    rows: RwLock<BTreeMap<Key, EmissionRecord>>,
}

impl MemoryEmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> EsgError {
    EsgError::Store("lock poisoned".into())
}

#[async_trait]
impl EmissionStore for MemoryEmissionStore {
    async fn upsert(&self, record: EmissionRecord) -> Result<EmissionRecord, EsgError> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        Ok(merge_into(&mut rows, record))
    }

    async fn get(&self, company: &str, year: i32) -> Result<Option<EmissionRecord>, EsgError> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows.get(&(company.to_string(), year)).cloned())
    }

    async fn list(&self, company: &str) -> Result<Vec<EmissionRecord>, EsgError> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(company_rows(&rows, company))
    }
}

/// A JSON array on disk, rewritten atomically after every upsert.
pub struct JsonFileEmissionStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<Key, EmissionRecord>>,
}

impl JsonFileEmissionStore {
    /// Open `path`, loading existing records. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, EsgError> {
        let path = path.into();
        let rows = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let records: Vec<EmissionRecord> =
                    serde_json::from_str(&raw).map_err(|e| EsgError::Store(format!("{}: {}", path.display(), e)))?;
                records.into_iter().map(|r| (r.key(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(EsgError::Store(format!("{}: {}", path.display(), e))),
        };
        debug!("Opened emission store {} ({} records)", path.display(), rows.len());
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EmissionStore for JsonFileEmissionStore {
    async fn upsert(&self, record: EmissionRecord) -> Result<EmissionRecord, EsgError> {
        let mut rows = self.rows.lock().await;
        let stored = merge_into(&mut rows, record);
        let all: Vec<&EmissionRecord> = rows.values().collect();
        write_json(&self.path, &all).await?;
        Ok(stored)
    }

    async fn get(&self, company: &str, year: i32) -> Result<Option<EmissionRecord>, EsgError> {
        Ok(self.rows.lock().await.get(&(company.to_string(), year)).cloned())
    }

    async fn list(&self, company: &str) -> Result<Vec<EmissionRecord>, EsgError> {
        Ok(company_rows(&*self.rows.lock().await, company))
    }
}
