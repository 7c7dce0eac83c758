use std::fs;

use camino::Utf8PathBuf;
use chrono::{DateTime, TimeZone, Utc};

use jobmerge::config::{Config, ConfigLoader, PortalConfig};
use jobmerge::dataset::PortalDataset;
use jobmerge::domain::{JobRecord, PortalKey, Text};
use jobmerge::store::Store;
use jobmerge::upsert::{MergeStats, UpsertStore, merge};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, hour, 0, 0).unwrap()
}

fn job(url: &str, hour: u32, title: &str) -> JobRecord {
    let mut record = JobRecord::empty(at(hour));
    record.job_url = Text::new(url);
    record.title = Text::new(title);
    record
}

fn merojob(autosave_every: usize) -> PortalConfig {
    let config = Config {
        autosave_every: Some(autosave_every),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config)
        .unwrap()
        .portal("merojob")
        .unwrap()
        .clone()
}

fn store(temp: &tempfile::TempDir) -> Store {
    Store::new_with_paths(
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap(),
        None,
    )
}

#[test]
fn fresh_insert() {
    let (dataset, stats) = merge(PortalDataset::new("merojob"), vec![job("u1", 1, "Clerk")]);
    assert_eq!(dataset.len(), 1);
    let key = dataset.keys().next().unwrap();
    assert_eq!(key.as_str(), "u1");
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.updated, 0);
}

#[test]
fn stale_rescrape_is_ignored() {
    let (existing, _) = merge(PortalDataset::new("merojob"), vec![job("u1", 2, "Current")]);
    let (merged, stats) = merge(existing.clone(), vec![job("u1", 1, "Stale")]);
    assert_eq!(merged, existing);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.updated, 0);
}

#[test]
fn newer_rescrape_replaces() {
    let (existing, _) = merge(PortalDataset::new("merojob"), vec![job("u1", 1, "Old title")]);
    let (merged, stats) = merge(existing, vec![job("u1", 2, "New title")]);
    let key = PortalKey::derive("merojob", &job("u1", 2, "x")).unwrap();
    assert_eq!(merged.get(&key).unwrap().title.as_str(), "New title");
    assert_eq!(
        stats,
        MergeStats {
            updated: 1,
            ..MergeStats::default()
        }
    );
}

#[test]
fn equal_timestamp_favors_incoming() {
    let (existing, _) = merge(PortalDataset::new("merojob"), vec![job("u1", 3, "Before")]);
    let (merged, stats) = merge(existing, vec![job("u1", 3, "After")]);
    assert_eq!(merged.iter().next().unwrap().1.title.as_str(), "After");
    assert_eq!(stats.updated, 1);
}

#[test]
fn merge_is_idempotent() {
    let mut existing = PortalDataset::new("merojob");
    let seed = job("u0", 1, "Seed");
    existing.insert(PortalKey::derive("merojob", &seed).unwrap(), seed);

    let incoming = vec![
        job("u1", 1, "A"),
        job("u2", 2, "B"),
        job("u1", 4, "A again"),
        job("u0", 5, "Seed refreshed"),
    ];
    let (once, _) = merge(existing, incoming.clone());
    let (twice, stats) = merge(once.clone(), incoming.clone());

    assert_eq!(once, twice);
    assert_eq!(stats.unchanged, incoming.len());
    assert_eq!(stats.inserted + stats.updated, 0);
}

#[test]
fn recency_wins_in_either_order() {
    let older = job("u9", 1, "Older");
    let newer = job("u9", 2, "Newer");

    let (a, _) = merge(PortalDataset::new("merojob"), vec![older.clone()]);
    let (a, _) = merge(a, vec![newer.clone()]);
    let (b, _) = merge(PortalDataset::new("merojob"), vec![newer.clone()]);
    let (b, _) = merge(b, vec![older]);

    assert_eq!(a, b);
    assert_eq!(a.iter().next().unwrap().1, &newer);
}

#[test]
fn ingest_persists_and_writes_audit_list() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let upsert = UpsertStore::new(&merojob(5), &store);

    let report = upsert
        .ingest(vec![job("https://m/1", 1, "A"), job("https://m/2", 1, "B")])
        .unwrap();
    assert_eq!(report.stats.inserted, 2);
    assert_eq!(report.total_records, 2);
    assert_eq!(report.commits, 1);

    let stored = PortalDataset::read(&store.portal_dataset_path("merojob")).unwrap();
    assert_eq!(stored.len(), 2);
    let audit = fs::read_to_string(store.portal_audit_path("merojob").as_std_path()).unwrap();
    assert_eq!(audit, "https://m/1\nhttps://m/2\n");

    let report = upsert.ingest(vec![job("https://m/3", 2, "C")]).unwrap();
    assert_eq!(report.total_records, 3);
    let audit = fs::read_to_string(store.portal_audit_path("merojob").as_std_path()).unwrap();
    assert_eq!(audit, "https://m/3\n");
}

#[test]
fn autosave_commits_complete_prefixes() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let upsert = UpsertStore::new(&merojob(2), &store);
    let path = store.portal_dataset_path("merojob");

    let mut sizes_seen_by_reader = Vec::new();
    let records = (1..=5).map(|n| {
        // Whatever is on disk while the stream is running is a full dataset.
        if let Ok(dataset) = PortalDataset::read(&path) {
            sizes_seen_by_reader.push(dataset.len());
        }
        job(&format!("https://m/{n}"), 1, "Role")
    });
    let report = upsert.ingest(records).unwrap();

    assert_eq!(report.commits, 3);
    assert_eq!(report.total_records, 5);
    assert_eq!(sizes_seen_by_reader, vec![2, 2, 4]);
}

#[test]
fn corrupted_dataset_is_quarantined() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let path = store.portal_dataset_path("merojob");
    fs::write(path.as_std_path(), b"{ not json").unwrap();

    let upsert = UpsertStore::new(&merojob(5), &store);
    let report = upsert.ingest(vec![job("https://m/1", 1, "A")]).unwrap();

    let quarantined = report.quarantined.expect("file was quarantined");
    assert!(
        quarantined
            .file_name()
            .unwrap()
            .starts_with("merojob_jobs.json.corrupted-")
    );
    assert_eq!(fs::read(quarantined.as_std_path()).unwrap(), b"{ not json");
    assert_eq!(report.total_records, 1);
    assert_eq!(PortalDataset::read(&path).unwrap().len(), 1);
}

#[test]
fn empty_pass_still_commits() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let upsert = UpsertStore::new(&merojob(5), &store);

    let report = upsert.ingest(Vec::new()).unwrap();
    assert_eq!(report.commits, 1);
    assert!(PortalDataset::read(&store.portal_dataset_path("merojob")).unwrap().is_empty());
}
