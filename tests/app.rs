use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use jobmerge::app::{App, PortalOutcome, PortalSelection};
use jobmerge::collect::{BulkRowProvider, Collector, UrlListing};
use jobmerge::config::{Config, ConfigLoader, PortalConfig, PortalEntry, ResolvedConfig};
use jobmerge::dataset::PortalDataset;
use jobmerge::error::PipelineError;
use jobmerge::export::{Encoding, decode_delimited};
use jobmerge::normalize::RawRecord;
use jobmerge::output::JsonOutput;

struct FakeListing {
    urls: Vec<String>,
    details: BTreeMap<String, RawRecord>,
}

impl UrlListing for FakeListing {
    fn collect_job_urls(&mut self, _portal: &PortalConfig) -> Result<Vec<String>, PipelineError> {
        Ok(self.urls.clone())
    }

    fn parse_job_detail(&mut self, url: &str) -> Result<Option<RawRecord>, PipelineError> {
        if url.ends_with("boom") {
            return Err(PipelineError::Collector("timeout".to_string()));
        }
        Ok(self.details.get(url).cloned())
    }
}

struct FakeRows(Vec<RawRecord>);

impl BulkRowProvider for FakeRows {
    fn collect_rows(&mut self, _portal: &PortalConfig) -> Result<Vec<RawRecord>, PipelineError> {
        Ok(self.0.clone())
    }
}

struct FailingRows;

impl BulkRowProvider for FailingRows {
    fn collect_rows(&mut self, _portal: &PortalConfig) -> Result<Vec<RawRecord>, PipelineError> {
        Err(PipelineError::Collector("session expired".to_string()))
    }
}

fn raw(value: Value) -> RawRecord {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

fn config(temp: &tempfile::TempDir) -> ResolvedConfig {
    ConfigLoader::resolve_config(Config {
        data_dir: Some(temp.path().to_str().unwrap().to_string()),
        portals: vec![
            PortalEntry::Shorthand("merojob".to_string()),
            PortalEntry::Shorthand("jobsnepal".to_string()),
            PortalEntry::Shorthand("linkedin".to_string()),
        ],
        ..Config::default()
    })
    .unwrap()
}

fn listing() -> Collector {
    let mut details = BTreeMap::new();
    details.insert(
        "https://merojob.com/a".to_string(),
        raw(json!({
            "title": "Backend Engineer",
            "company": "Acme",
            "scraped_at": "2025-03-01T10:00:00Z",
        })),
    );
    details.insert(
        "https://merojob.com/b".to_string(),
        raw(json!({
            "job_url": "https://shared.example/job/1",
            "title": "Accountant",
            "scraped_at": "2025-03-01T09:00:00Z",
        })),
    );
    Collector::Listing(Box::new(FakeListing {
        urls: vec![
            "https://merojob.com/a".to_string(),
            "https://merojob.com/a".to_string(),
            "https://merojob.com/b".to_string(),
            "https://merojob.com/gone".to_string(),
            "https://merojob.com/boom".to_string(),
        ],
        details,
    }))
}

fn rows() -> Collector {
    Collector::Rows(Box::new(FakeRows(vec![
        raw(json!({
            "Job Title": "Senior Accountant",
            "Link": "https://shared.example/job/1/",
            "Date Saved": "2025-03-02",
            "scraped_at": "2025-03-02T08:00:00Z",
        })),
        raw(json!({"Job Title": "", "Company Name": "", "notes": "blank row"})),
    ])))
}

#[test]
fn full_cycle_merges_all_portals() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(&temp);
    let inbox = temp.path().join("inbox").join("jobsnepal");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(
        inbox.join("export.csv"),
        "\u{feff}Designation,Company,Job URL,Location,scraped_at\n\
         Driver,Sajha,https://jobsnepal.com/9,Lalitpur,2025-03-01T00:00:00Z\n",
    )
    .unwrap();

    let mut app = App::new(config)
        .with_collector("merojob", listing())
        .with_collector("linkedin", rows());
    let result = app.run_cycle(&PortalSelection::All, &JsonOutput).unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);

    let saved = result
        .portals
        .iter()
        .map(|outcome| match outcome {
            PortalOutcome::Saved(report) => (report.portal.clone(), report.stats),
            PortalOutcome::Failed { portal, error } => panic!("{portal}: {error}"),
        })
        .collect::<BTreeMap<_, _>>();
    assert_eq!(saved["merojob"].inserted, 2);
    assert_eq!(saved["jobsnepal"].inserted, 1);
    assert_eq!(saved["linkedin"].inserted, 1);
    assert_eq!(saved["linkedin"].skipped, 1);

    let master = result.master.as_ref().unwrap();
    assert_eq!(master.rows, 3);

    let csv = fs::read(app.store().master_path(Encoding::Csv).as_std_path()).unwrap();
    let table = decode_delimited(&csv, b',').unwrap();
    let title = table.column_index("title").unwrap();
    let source = table.column_index("source").unwrap();
    let shared = table
        .rows
        .iter()
        .find(|row| row[0] == "https://shared.example/job/1")
        .unwrap();
    assert_eq!(shared[title], "Senior Accountant");
    assert_eq!(shared[source], "linkedin");

    let audit = fs::read_to_string(
        app.store()
            .portal_audit_path("merojob")
            .as_std_path(),
    )
    .unwrap();
    assert_eq!(audit.lines().count(), 2);
    let collected = fs::read_to_string(
        app.store()
            .portal_urls_path("merojob")
            .as_std_path(),
    )
    .unwrap();
    assert_eq!(
        collected.lines().collect::<Vec<_>>(),
        vec![
            "https://merojob.com/a",
            "https://merojob.com/b",
            "https://merojob.com/gone",
            "https://merojob.com/boom",
        ]
    );
    assert!(!app.store().portal_urls_path("linkedin").as_std_path().exists());
    assert!(result.audit.as_ref().unwrap().path.as_std_path().is_file());
}

#[test]
fn second_cycle_changes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(config(&temp))
        .with_collector("merojob", listing())
        .with_collector("linkedin", rows());
    app.run_cycle(&PortalSelection::One("merojob".into()), &JsonOutput)
        .unwrap();
    let before = PortalDataset::read(&app.store().portal_dataset_path("merojob")).unwrap();

    let report = app.run_portal("merojob", &JsonOutput).unwrap();
    assert_eq!(report.stats.unchanged, 2);
    assert_eq!(report.stats.inserted + report.stats.updated, 0);
    let after = PortalDataset::read(&app.store().portal_dataset_path("merojob")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn placeholder_detail_url_falls_back_to_listing_url() {
    let temp = tempfile::tempdir().unwrap();
    let mut details = BTreeMap::new();
    details.insert(
        "https://merojob.com/jobs/42".to_string(),
        raw(json!({"job_url": "Non", "title": "Clerk"})),
    );
    let collector = Collector::Listing(Box::new(FakeListing {
        urls: vec!["https://merojob.com/jobs/42".to_string()],
        details,
    }));
    let mut app = App::new(config(&temp)).with_collector("merojob", collector);

    let report = app.run_portal("merojob", &JsonOutput).unwrap();
    assert_eq!(report.stats.inserted, 1);
    let stored = PortalDataset::read(&app.store().portal_dataset_path("merojob")).unwrap();
    let (key, record) = stored.iter().next().unwrap();
    assert_eq!(key.as_str(), "https://merojob.com/jobs/42");
    assert_eq!(record.job_url.as_str(), "https://merojob.com/jobs/42");
    assert_eq!(record.title.as_str(), "Clerk");
}

#[test]
fn failing_portal_does_not_stop_the_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(config(&temp))
        .with_collector("merojob", listing())
        .with_collector("linkedin", Collector::Rows(Box::new(FailingRows)));
    let result = app.run_cycle(&PortalSelection::All, &JsonOutput).unwrap();

    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("linkedin:"));
    assert_eq!(result.master.as_ref().unwrap().rows, 2);
    assert!(result.audit.is_some());
}

#[test]
fn unknown_portal_is_rejected_up_front() {
    let temp = tempfile::tempdir().unwrap();
    let mut app = App::new(config(&temp));
    let err = app
        .run_cycle(&PortalSelection::One("indeed".into()), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, PipelineError::UnknownPortal(_));
    assert!(!temp.path().join("jobs_master.csv").exists());
}

#[test]
fn ingest_accepts_records_collected_elsewhere() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(&temp));
    let report = app
        .ingest(
            "jobsnepal",
            vec![raw(json!({"url": "https://jobsnepal.com/1", "title": "Chef"}))],
        )
        .unwrap();
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.total_records, 1);
}
