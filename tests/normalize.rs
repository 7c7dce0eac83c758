use std::collections::BTreeMap;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;

use jobmerge::config::{Config, ConfigLoader, PortalConfig, PortalEntry, PortalEntryObject};
use jobmerge::domain::{Category, FieldName, PLACEHOLDER, WorkMode};
use jobmerge::error::PipelineError;
use jobmerge::normalize::{Normalizer, RawRecord};

fn portal(name: &str, overrides: &[(&str, &str)]) -> PortalConfig {
    let config = Config {
        portals: vec![PortalEntry::Detailed(PortalEntryObject {
            name: name.to_string(),
            column_overrides: overrides
                .iter()
                .map(|(canonical, source)| (canonical.to_string(), source.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..PortalEntryObject::default()
        })],
        ..Config::default()
    };
    ConfigLoader::resolve_config(config)
        .unwrap()
        .portal(name)
        .unwrap()
        .clone()
}

fn raw(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

#[test]
fn every_field_is_populated() {
    let normalizer = Normalizer::new(&portal("merojob", &[]));
    let observed = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
    let (_, record) = normalizer
        .normalize(&raw(json!({"title": "Accountant", "bogus": [1, 2]})), observed)
        .unwrap();

    for name in FieldName::ALL {
        assert!(!record.field(name).as_str().is_empty(), "{name} is empty");
    }
    assert_eq!(record.company.as_str(), PLACEHOLDER);
    assert_eq!(record.source.as_str(), "merojob");
    assert_eq!(record.country.as_str(), "Nepal");
    assert_eq!(record.scraped_at, observed);
    assert!(record.cells().iter().all(|cell| !cell.is_empty()));
}

#[test]
fn native_portal_names_are_recognized() {
    let normalizer = Normalizer::new(&portal("jobsnepal", &[]));
    let (key, record) = normalizer
        .normalize(
            &raw(json!({
                "Designation": "  Senior   Python Developer ",
                "Company Name": "Acme Pvt. Ltd.",
                "Job Link": "https://jobsnepal.com/jobs/77",
                "onsite_hybrid_remote": "Hybrid",
                "Offered Salary": "NPR 80,000 - 1,20,000 / Month",
                "Experience Required": "2-4 years",
                "date_posted": "N/A",
            })),
            Utc::now(),
        )
        .unwrap();

    assert_eq!(key.as_str(), "https://jobsnepal.com/jobs/77");
    assert_eq!(record.title.as_str(), "Senior Python Developer");
    assert_eq!(record.company.as_str(), "Acme Pvt. Ltd.");
    assert_eq!(record.work_mode, WorkMode::Hybrid);
    assert_eq!(record.category_primary, Category::It);
    assert_eq!(record.salary_min.as_str(), "80000");
    assert_eq!(record.salary_max.as_str(), "120000");
    assert_eq!(record.salary_currency.as_str(), "NPR");
    assert_eq!(record.salary_period.as_str(), "month");
    assert_eq!(record.experience_min_years.as_str(), "2");
    assert_eq!(record.experience_max_years.as_str(), "4");
    assert!(record.posted_date.is_missing());
}

#[test]
fn overrides_take_precedence_over_defaults() {
    let normalizer = Normalizer::new(&portal(
        "linkedin",
        &[("title", "Position Name"), ("job_url", "Permalink")],
    ));
    let (key, record) = normalizer
        .normalize(
            &raw(json!({
                "title": "ignored",
                "position name": "Nurse",
                "PERMALINK": "https://www.linkedin.com/jobs/view/1",
                "location": "Pokhara (Remote)",
            })),
            Utc::now(),
        )
        .unwrap();

    assert_eq!(record.title.as_str(), "Nurse");
    assert_eq!(key.as_str(), "https://www.linkedin.com/jobs/view/1");
    assert_eq!(record.work_mode, WorkMode::Remote);
    assert_eq!(record.category_primary, Category::NonIt);
}

#[test]
fn explicit_timestamp_and_country_are_kept() {
    let normalizer = Normalizer::new(&portal("linkedin", &[]));
    let (_, record) = normalizer
        .normalize(
            &raw(json!({
                "url": "https://example.org/a",
                "country": "India",
                "scraped_at": "2024-12-31T23:00:00Z",
            })),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(record.country.as_str(), "India");
    assert_eq!(
        record.scraped_at,
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap()
    );
    assert_eq!(record.work_mode, WorkMode::Unknown);
    assert_eq!(record.category_primary, Category::Unknown);
}

#[test]
fn unknown_portal_has_no_country() {
    let normalizer = Normalizer::new(&portal("kumarijob", &[]));
    let (key, record) = normalizer
        .normalize(&raw(json!({"job_id": 42, "title": "Driver"})), Utc::now())
        .unwrap();
    assert!(record.country.is_missing());
    assert_eq!(record.job_id.as_str(), "42");
    assert!(key.as_str().starts_with("kumarijob:"));
}

#[test]
fn record_without_identity_is_rejected() {
    let normalizer = Normalizer::new(&portal("merojob", &[]));
    let err = normalizer
        .normalize(&raw(json!({"skills": "Excel", "url": "  "})), Utc::now())
        .unwrap_err();
    assert_matches!(err, PipelineError::MissingIdentity(_));
}
