//! Incremental per-portal persistence.
//!
//! Each collection pass merges into the dataset already on disk. Records are
//! only ever inserted or replaced by a newer-or-equal observation of the same
//! [`PortalKey`]; nothing is pruned.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::atomic::AtomicWriter;
use crate::config::PortalConfig;
use crate::dataset::PortalDataset;
use crate::domain::{JobRecord, PortalKey};
use crate::error::PipelineError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
    }

    pub fn seen(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.skipped
    }
}

/// Merges `incoming` into `existing` by portal key, newest `scraped_at` winning.
///
/// An incoming record with an equal or newer timestamp replaces the stored
/// one; it counts as `updated` only when the content differs. Older incoming
/// records, and records superseded by a later one in the same batch, count as
/// `unchanged`. Records without a derivable key count as `skipped`.
pub fn merge(
    mut existing: PortalDataset,
    incoming: impl IntoIterator<Item = JobRecord>,
) -> (PortalDataset, MergeStats) {
    let mut stats = MergeStats::default();

    let mut batch: BTreeMap<PortalKey, JobRecord> = BTreeMap::new();
    for record in incoming {
        let key = match PortalKey::derive(existing.portal(), &record) {
            Ok(key) => key,
            Err(err) => {
                debug!(portal = existing.portal(), "skipping record: {err}");
                stats.skipped += 1;
                continue;
            }
        };
        match batch.get(&key) {
            Some(held) if held.scraped_at > record.scraped_at => stats.unchanged += 1,
            Some(_) => {
                stats.unchanged += 1;
                batch.insert(key, record);
            }
            None => {
                batch.insert(key, record);
            }
        }
    }

    for (key, record) in batch {
        match existing.get(&key) {
            None => {
                stats.inserted += 1;
                existing.insert(key, record);
            }
            Some(stored) if record.scraped_at >= stored.scraped_at => {
                if *stored == record {
                    stats.unchanged += 1;
                } else {
                    stats.updated += 1;
                    existing.insert(key, record);
                }
            }
            Some(_) => stats.unchanged += 1,
        }
    }

    (existing, stats)
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub portal: String,
    pub stats: MergeStats,
    pub total_records: usize,
    pub commits: usize,
    pub quarantined: Option<Utf8PathBuf>,
    pub dataset_path: Utf8PathBuf,
}

/// Owns the dataset file of one portal.
#[derive(Debug, Clone)]
pub struct UpsertStore {
    portal: String,
    store: Store,
    writer: AtomicWriter,
    autosave_every: usize,
}

impl UpsertStore {
    pub fn new(portal: &PortalConfig, store: &Store) -> Self {
        Self {
            portal: portal.name.clone(),
            store: store.clone(),
            writer: AtomicWriter::for_store(store),
            autosave_every: portal.autosave_every.max(1),
        }
    }

    pub fn portal(&self) -> &str {
        &self.portal
    }

    pub fn dataset_path(&self) -> Utf8PathBuf {
        self.store.portal_dataset_path(&self.portal)
    }

    /// Loads the stored dataset. A missing file is an empty dataset; a corrupted
    /// one is renamed aside and also yields an empty dataset.
    pub fn load(&self) -> Result<(PortalDataset, Option<Utf8PathBuf>), PipelineError> {
        let path = self.dataset_path();
        match PortalDataset::read(&path) {
            Ok(dataset) if dataset.portal() != self.portal => {
                warn!(
                    file = %path,
                    stored = dataset.portal(),
                    "dataset was saved under another portal name"
                );
                Ok((dataset.with_portal(&self.portal), None))
            }
            Ok(dataset) => Ok((dataset, None)),
            Err(PipelineError::MissingSourceFile(_)) => Ok((PortalDataset::new(&self.portal), None)),
            Err(PipelineError::CorruptedDataset { message, .. }) => {
                let quarantined = self.quarantine(&path)?;
                error!(
                    portal = %self.portal,
                    file = %path,
                    quarantined = %quarantined,
                    "dataset could not be parsed ({message}); continuing with an empty dataset"
                );
                Ok((PortalDataset::new(&self.portal), Some(quarantined)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn commit(&self, dataset: &PortalDataset) -> Result<(), PipelineError> {
        self.writer.write_dataset(&self.dataset_path(), dataset)
    }

    /// Loads, merges and commits in one step.
    pub fn upsert(
        &self,
        records: impl IntoIterator<Item = JobRecord>,
    ) -> Result<(PortalDataset, MergeStats), PipelineError> {
        let (existing, _) = self.load()?;
        let (merged, stats) = merge(existing, records);
        self.commit(&merged)?;
        Ok((merged, stats))
    }

    /// Merges a stream of records, committing the whole accumulated dataset
    /// after every `autosave_every` records and once at the end. The keys seen
    /// in this pass are written to the audit list.
    pub fn ingest(
        &self,
        records: impl IntoIterator<Item = JobRecord>,
    ) -> Result<IngestReport, PipelineError> {
        let (mut dataset, quarantined) = self.load()?;
        let mut stats = MergeStats::default();
        let mut commits = 0;
        let mut seen_keys: Vec<PortalKey> = Vec::new();
        let mut pending: Vec<JobRecord> = Vec::with_capacity(self.autosave_every);

        for record in records {
            pending.push(record);
            if pending.len() >= self.autosave_every {
                dataset = self.flush(dataset, &mut pending, &mut seen_keys, &mut stats)?;
                commits += 1;
            }
        }
        if !pending.is_empty() || commits == 0 {
            dataset = self.flush(dataset, &mut pending, &mut seen_keys, &mut stats)?;
            commits += 1;
        }

        self.write_audit_list(&seen_keys)?;

        info!(
            portal = %self.portal,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            total = dataset.len(),
            "portal dataset saved"
        );

        Ok(IngestReport {
            portal: self.portal.clone(),
            stats,
            total_records: dataset.len(),
            commits,
            quarantined,
            dataset_path: self.dataset_path(),
        })
    }

    fn flush(
        &self,
        dataset: PortalDataset,
        pending: &mut Vec<JobRecord>,
        seen_keys: &mut Vec<PortalKey>,
        stats: &mut MergeStats,
    ) -> Result<PortalDataset, PipelineError> {
        seen_keys.extend(
            pending
                .iter()
                .filter_map(|record| PortalKey::derive(&self.portal, record).ok()),
        );
        let (merged, batch) = merge(dataset, pending.drain(..));
        stats.absorb(batch);
        self.commit(&merged)?;
        debug!(portal = %self.portal, records = merged.len(), "autosaved");
        Ok(merged)
    }

    /// Debug artifact: keys collected by the last pass, one per line.
    pub fn write_audit_list(&self, keys: &[PortalKey]) -> Result<(), PipelineError> {
        let path = self.store.portal_audit_path(&self.portal);
        write_lines(&path, keys.iter().map(PortalKey::as_str))
    }

    /// Debug artifact: every URL the listing pass discovered, including the
    /// ones whose detail page yielded no record.
    pub fn write_collected_urls(&self, urls: &[String]) -> Result<(), PipelineError> {
        let path = self.store.portal_urls_path(&self.portal);
        write_lines(&path, urls.iter().map(String::as_str))
    }

    fn quarantine(&self, path: &Utf8Path) -> Result<Utf8PathBuf, PipelineError> {
        let now = Utc::now();
        let mut target = Store::quarantine_path(path, now);
        let mut attempt = 1;
        while target.as_std_path().exists() {
            attempt += 1;
            target = Utf8PathBuf::from(format!("{}-{attempt}", Store::quarantine_path(path, now)));
        }
        fs::rename(path.as_std_path(), target.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("quarantine {path}: {err}")))?;
        Ok(target)
    }
}

fn write_lines<'a>(path: &Utf8Path, lines: impl Iterator<Item = &'a str>) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    fs::write(path.as_std_path(), content)
        .map_err(|err| PipelineError::Filesystem(format!("write {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone};

    use super::*;
    use crate::domain::Text;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    fn job(url: &str, hour: u32, title: &str) -> JobRecord {
        let mut record = JobRecord::empty(at(hour));
        record.job_url = Text::new(url);
        record.title = Text::new(title);
        record
    }

    #[test]
    fn later_duplicate_in_batch_wins() {
        let (dataset, stats) = merge(
            PortalDataset::new("merojob"),
            vec![job("u1", 1, "Old"), job("u1", 2, "New"), job("u1", 1, "Older")],
        );
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.iter().next().unwrap().1.title.as_str(), "New");
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.unchanged, 2);
    }

    #[test]
    fn record_without_identity_is_skipped() {
        let (dataset, stats) = merge(
            PortalDataset::new("merojob"),
            vec![JobRecord::empty(at(1)), job("u1", 1, "Clerk")],
        );
        assert_eq!(dataset.len(), 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.seen(), 2);
    }
}
