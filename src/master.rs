//! Cross-portal master dataset.
//!
//! Every configured portal dataset is read, each record gets a [`GlobalKey`],
//! collisions keep the freshest observation, and the result is written once
//! per configured encoding. Each encoding is replaced on its own so one
//! failing output never affects the others.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::atomic::AtomicWriter;
use crate::config::ResolvedConfig;
use crate::dataset::PortalDataset;
use crate::domain::{
    Category, GlobalKey, JobRecord, PortalKey, RECORD_COLUMNS, Text, format_timestamp,
};
use crate::error::PipelineError;
use crate::export::{Encoding, Table};
use crate::normalize::classify_record;
use crate::store::{MASTER_STEM, Store};

pub const GLOBAL_KEY_COLUMN: &str = "global_key";
pub const BUILT_AT_COLUMN: &str = "master_built_at";

#[derive(Debug, Clone, PartialEq)]
pub struct MasterRecord {
    pub global_key: GlobalKey,
    pub portal: String,
    pub portal_key: PortalKey,
    pub record: JobRecord,
}

/// Deduplicated records in output order: newest first, then by global key.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterDataset {
    pub built_at: DateTime<Utc>,
    pub records: Vec<MasterRecord>,
}

impl MasterDataset {
    /// Collapses the given portal datasets into one master dataset.
    pub fn merge(datasets: &[PortalDataset], built_at: DateTime<Utc>) -> Self {
        let mut by_key: BTreeMap<GlobalKey, MasterRecord> = BTreeMap::new();
        for dataset in datasets {
            for (portal_key, record) in dataset.iter() {
                let record = canonicalize(dataset.portal(), record);
                let candidate = MasterRecord {
                    global_key: GlobalKey::derive(&record, portal_key),
                    portal: dataset.portal().to_string(),
                    portal_key: portal_key.clone(),
                    record,
                };
                match by_key.get(&candidate.global_key) {
                    Some(held) if !supersedes(&candidate, held) => {}
                    _ => {
                        by_key.insert(candidate.global_key.clone(), candidate);
                    }
                }
            }
        }

        let mut records = by_key.into_values().collect::<Vec<_>>();
        records.sort_by(|a, b| {
            b.record
                .scraped_at
                .cmp(&a.record.scraped_at)
                .then_with(|| a.global_key.cmp(&b.global_key))
        });
        Self { built_at, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &GlobalKey) -> Option<&MasterRecord> {
        self.records.iter().find(|entry| &entry.global_key == key)
    }

    pub fn columns() -> Vec<String> {
        std::iter::once(GLOBAL_KEY_COLUMN)
            .chain(RECORD_COLUMNS)
            .chain(std::iter::once(BUILT_AT_COLUMN))
            .map(str::to_string)
            .collect()
    }

    pub fn to_table(&self) -> Table {
        let built_at = format_timestamp(&self.built_at);
        let mut table = Table::new(Self::columns());
        table.rows = self
            .records
            .iter()
            .map(|entry| {
                let mut row = Vec::with_capacity(RECORD_COLUMNS.len() + 2);
                row.push(entry.global_key.to_string());
                row.extend(entry.record.cells());
                row.push(built_at.clone());
                row
            })
            .collect();
        table
    }
}

// Newer wins; equal timestamps go to the greater (source, portal key) so the
// outcome does not depend on portal order.
fn supersedes(candidate: &MasterRecord, held: &MasterRecord) -> bool {
    candidate
        .record
        .scraped_at
        .cmp(&held.record.scraped_at)
        .then_with(|| {
            (candidate.record.source.as_str(), candidate.portal_key.as_str())
                .cmp(&(held.record.source.as_str(), held.portal_key.as_str()))
        })
        .is_gt()
}

fn canonicalize(portal: &str, record: &JobRecord) -> JobRecord {
    let mut record = record.clone();
    record.source = match record.source.value() {
        Some(source) => Text::new(source.to_lowercase()),
        None => Text::new(portal),
    };
    if record.category_primary == Category::Unknown {
        record.category_primary = classify_record(&record);
    }
    record
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Loaded,
    Missing,
    Corrupted,
    Unreadable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub portal: String,
    pub status: SourceStatus,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodingOutcome {
    pub encoding: Encoding,
    pub path: Utf8PathBuf,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub built_at: DateTime<Utc>,
    pub rows: usize,
    pub sources: Vec<SourceOutcome>,
    pub outputs: Vec<EncodingOutcome>,
}

impl BuildReport {
    pub fn failed_outputs(&self) -> impl Iterator<Item = &EncodingOutcome> {
        self.outputs.iter().filter(|outcome| outcome.error.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct MasterBuilder {
    store: Store,
    writer: AtomicWriter,
    portals: Vec<String>,
    encodings: Vec<Encoding>,
}

impl MasterBuilder {
    pub fn new(config: &ResolvedConfig, store: &Store) -> Self {
        Self::with_portals(store, config.portal_names(), config.master_encodings.clone())
    }

    pub fn with_portals(store: &Store, portals: Vec<String>, encodings: Vec<Encoding>) -> Self {
        Self {
            store: store.clone(),
            writer: AtomicWriter::for_store(store),
            portals,
            encodings,
        }
    }

    /// Reads every portal dataset, skipping the ones that are absent or unreadable.
    pub fn load_sources(&self) -> (Vec<PortalDataset>, Vec<SourceOutcome>) {
        let mut datasets = Vec::new();
        let mut outcomes = Vec::new();
        for portal in &self.portals {
            let path = self.store.portal_dataset_path(portal);
            let (status, records) = match PortalDataset::read(&path) {
                Ok(dataset) => {
                    let count = dataset.len();
                    datasets.push(dataset.with_portal(portal.as_str()));
                    (SourceStatus::Loaded, count)
                }
                Err(PipelineError::MissingSourceFile(_)) => {
                    info!(portal = %portal, file = %path, "no dataset yet, contributing nothing");
                    (SourceStatus::Missing, 0)
                }
                Err(err @ PipelineError::CorruptedDataset { .. }) => {
                    error!(portal = %portal, "skipping portal: {err}");
                    (SourceStatus::Corrupted, 0)
                }
                Err(err) => {
                    warn!(portal = %portal, "skipping portal: {err}");
                    (SourceStatus::Unreadable, 0)
                }
            };
            outcomes.push(SourceOutcome {
                portal: portal.clone(),
                status,
                records,
            });
        }
        (datasets, outcomes)
    }

    pub fn build(&self) -> Result<BuildReport, PipelineError> {
        self.build_at(Utc::now())
    }

    /// Builds and writes the master dataset stamped with `built_at`.
    ///
    /// Fails only when the data directory cannot be created; a failing
    /// encoding is recorded in the report.
    pub fn build_at(&self, built_at: DateTime<Utc>) -> Result<BuildReport, PipelineError> {
        self.store.ensure_data_root()?;
        let (datasets, sources) = self.load_sources();
        let master = MasterDataset::merge(&datasets, built_at);
        let table = master.to_table();

        let mut outputs = Vec::with_capacity(self.encodings.len());
        for encoding in &self.encodings {
            let path = self.store.master_path(*encoding);
            let result = encoding
                .encode(&table, MASTER_STEM)
                .and_then(|bytes| self.writer.write_bytes(&path, &bytes));
            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    error!(encoding = %encoding, file = %path, "master output not written: {err}");
                    Some(err.to_string())
                }
            };
            outputs.push(EncodingOutcome {
                encoding: *encoding,
                path,
                error,
            });
        }

        info!(
            rows = master.len(),
            portals = datasets.len(),
            "master dataset built"
        );

        Ok(BuildReport {
            built_at,
            rows: master.len(),
            sources,
            outputs,
        })
    }
}
