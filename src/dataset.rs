use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobRecord, PortalKey, RECORD_COLUMNS};
use crate::error::PipelineError;
use crate::export::Table;

pub const DATASET_SCHEMA_VERSION: u32 = 1;

/// One portal's accumulated records, unique by [`PortalKey`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortalDataset {
    portal: String,
    records: BTreeMap<PortalKey, JobRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetDocument {
    schema_version: u32,
    portal: String,
    saved_at: DateTime<Utc>,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    portal_key: PortalKey,
    #[serde(flatten)]
    record: JobRecord,
}

impl PortalDataset {
    pub fn new(portal: impl Into<String>) -> Self {
        Self {
            portal: portal.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn portal(&self) -> &str {
        &self.portal
    }

    pub fn with_portal(mut self, portal: impl Into<String>) -> Self {
        self.portal = portal.into();
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &PortalKey) -> Option<&JobRecord> {
        self.records.get(key)
    }

    pub fn insert(&mut self, key: PortalKey, record: JobRecord) -> Option<JobRecord> {
        self.records.insert(key, record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortalKey, &JobRecord)> {
        self.records.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PortalKey> {
        self.records.keys()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(RECORD_COLUMNS.iter().map(|c| c.to_string()).collect());
        table.rows = self.records.values().map(JobRecord::cells).collect();
        table
    }

    pub fn to_bytes(&self, saved_at: DateTime<Utc>) -> Result<Vec<u8>, PipelineError> {
        let document = DatasetDocument {
            schema_version: DATASET_SCHEMA_VERSION,
            portal: self.portal.clone(),
            saved_at,
            records: self
                .records
                .iter()
                .map(|(key, record)| StoredRecord {
                    portal_key: key.clone(),
                    record: record.clone(),
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&document).map_err(|err| PipelineError::Encoding(err.to_string()))
    }

    /// Parses a stored dataset; anything unparseable is [`PipelineError::CorruptedDataset`].
    pub fn from_bytes(path: &Utf8Path, bytes: &[u8]) -> Result<Self, PipelineError> {
        let document: DatasetDocument =
            serde_json::from_slice(bytes).map_err(|err| PipelineError::CorruptedDataset {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        if document.schema_version > DATASET_SCHEMA_VERSION {
            return Err(PipelineError::CorruptedDataset {
                path: path.to_path_buf(),
                message: format!("unsupported schema_version {}", document.schema_version),
            });
        }
        let records = document
            .records
            .into_iter()
            .map(|stored| (stored.portal_key, stored.record))
            .collect();
        Ok(Self {
            portal: document.portal,
            records,
        })
    }

    pub fn read(path: &Utf8Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(path.as_std_path()).map_err(|err| match err.kind() {
            ErrorKind::NotFound => PipelineError::MissingSourceFile(path.to_path_buf()),
            _ => PipelineError::Filesystem(format!("read {path}: {err}")),
        })?;
        Self::from_bytes(path, &bytes)
    }
}
