//! Raw collector output to canonical [`JobRecord`]s.
//!
//! A raw record is a loosely-typed JSON object. Source keys are matched
//! case-insensitively against a per-portal override table first and the
//! default alias table second. Anything that cannot be resolved ends up as the
//! placeholder; only a record without any identity is rejected.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::config::PortalConfig;
use crate::domain::{Category, FieldName, JobRecord, PortalKey, Text, WorkMode, is_missing};
use crate::error::PipelineError;
use crate::infer::{classify_category, infer_work_mode, parse_experience, parse_salary};

pub type RawRecord = Map<String, Value>;

/// Canonical names accepted as keys of `column_overrides`.
pub const OVERRIDABLE_FIELDS: [&str; 30] = [
    "job_id",
    "job_url",
    "source",
    "title",
    "company",
    "company_link",
    "location",
    "country",
    "posted_date",
    "num_applicants",
    "work_mode",
    "employment_type",
    "position",
    "type",
    "compensation",
    "commitment",
    "skills",
    "category_primary",
    "industry",
    "level",
    "experience_min_years",
    "experience_max_years",
    "salary_min",
    "salary_max",
    "salary_currency",
    "salary_period",
    "deadline",
    "scraped_at",
    "experience",
    "description",
];

/// Default source names per canonical field, already in lookup form.
fn default_aliases(canonical: &str) -> &'static [&'static str] {
    match canonical {
        "job_id" => &["job_id", "jobid", "id", "posting_id"],
        "job_url" => &[
            "job_url",
            "url",
            "link",
            "job_link",
            "posting_url",
            "posting_link",
            "href",
        ],
        "source" => &["source", "portal"],
        "title" => &[
            "title",
            "designation",
            "job_title",
            "position_title",
            "role",
            "job_name",
            "job",
        ],
        "company" => &["company", "company_name", "organization", "employer"],
        "company_link" => &["company_link", "company_url"],
        "location" => &["location", "job_location", "city", "address"],
        "country" => &["country"],
        "posted_date" => &[
            "posted_date",
            "date_posted",
            "date_saved",
            "saved_date",
            "saved_on",
            "posted_on",
            "date",
            "created_at",
        ],
        "num_applicants" => &["num_applicants", "applicants"],
        "work_mode" => &["work_mode", "onsite_hybrid_remote", "workplace_type"],
        "employment_type" => &["employment_type", "job_type"],
        "position" => &["position"],
        "type" => &["type"],
        "compensation" => &["compensation", "salary_raw", "salary", "offered_salary"],
        "commitment" => &["commitment"],
        "skills" => &["skills", "key_skills"],
        "category_primary" => &["category_primary", "it_non_it"],
        "industry" => &["industry", "job_category", "category"],
        "level" => &["level", "job_level", "seniority"],
        "experience_min_years" => &["experience_min_years"],
        "experience_max_years" => &["experience_max_years"],
        "salary_min" => &["salary_min"],
        "salary_max" => &["salary_max"],
        "salary_currency" => &["salary_currency", "currency"],
        "salary_period" => &["salary_period"],
        "deadline" => &["deadline", "apply_before", "expiry_date"],
        "scraped_at" => &["scraped_at"],
        "experience" => &["experience_raw", "experience", "experience_required"],
        "description" => &[
            "description",
            "job_description",
            "full_text",
            "summary",
            "details",
        ],
        _ => &[],
    }
}

/// Maps raw records of one portal to canonical records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    portal: String,
    country: Option<String>,
    overrides: BTreeMap<String, String>,
}

impl Normalizer {
    pub fn new(portal: &PortalConfig) -> Self {
        let overrides = portal
            .column_overrides
            .iter()
            .map(|(canonical, source)| (canonical.clone(), lookup_form(source)))
            .collect();
        Self {
            portal: portal.name.clone(),
            country: portal.country.clone(),
            overrides,
        }
    }

    pub fn portal(&self) -> &str {
        &self.portal
    }

    /// Produces a complete record and its portal key.
    ///
    /// Never fails on malformed content. Fails with
    /// [`PipelineError::MissingIdentity`] when no key can be derived.
    pub fn normalize(
        &self,
        raw: &RawRecord,
        observed_at: DateTime<Utc>,
    ) -> Result<(PortalKey, JobRecord), PipelineError> {
        let fields = RawFields::new(raw);
        let get = |canonical: &str| self.lookup(&fields, canonical);

        let scraped_at = get("scraped_at")
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(observed_at);
        let mut record = JobRecord::empty(scraped_at);

        for name in FieldName::ALL {
            *record.field_mut(name) = Text::from(get(name.as_str()));
        }
        if record.source.is_missing() {
            record.source = Text::new(&self.portal);
        }
        if record.country.is_missing() {
            if let Some(country) = &self.country {
                record.country = Text::new(country);
            }
        }

        let description = get("description").unwrap_or_default();

        record.work_mode = get("work_mode")
            .map(|value| WorkMode::parse_lenient(&value))
            .unwrap_or_default();
        if record.work_mode == WorkMode::Unknown {
            let text = format!(
                "{} {} {} {}",
                text_or_empty(&record.location),
                text_or_empty(&record.title),
                text_or_empty(&record.commitment),
                description
            );
            record.work_mode = infer_work_mode(&text);
        }

        record.category_primary = get("category_primary")
            .map(|value| Category::parse_lenient(&value))
            .unwrap_or_default();
        if record.category_primary == Category::Unknown {
            record.category_primary = classify_record(&record);
        }

        fill_experience(&mut record, get("experience").as_deref());
        fill_salary(&mut record);

        let key = PortalKey::derive(&self.portal, &record)?;
        Ok((key, record))
    }

    /// Sets `canonical` to `value` unless the raw record already resolves it
    /// to a real value. Placeholder entries under any spelling of the field are
    /// dropped first. Returns whether the value was filled in.
    pub fn fill_missing(&self, raw: &mut RawRecord, canonical: &str, value: &str) -> bool {
        if self.lookup(&RawFields::new(raw), canonical).is_some() {
            return false;
        }
        raw.retain(|key, _| lookup_form(key) != canonical);
        raw.insert(canonical.to_string(), Value::String(value.to_string()));
        true
    }

    fn lookup(&self, fields: &RawFields<'_>, canonical: &str) -> Option<String> {
        if let Some(source) = self.overrides.get(canonical) {
            if let Some(value) = fields.get(source) {
                return Some(value);
            }
        }
        default_aliases(canonical)
            .iter()
            .find_map(|alias| fields.get(alias))
    }
}

/// Category from the record's own text; used by the normalizer and by the
/// master build for rows stored before classification existed.
pub fn classify_record(record: &JobRecord) -> Category {
    classify_category(&[
        text_or_empty(&record.title),
        text_or_empty(&record.industry),
        text_or_empty(&record.skills),
        text_or_empty(&record.position),
    ])
}

struct RawFields<'a> {
    by_key: BTreeMap<String, &'a Value>,
}

impl<'a> RawFields<'a> {
    fn new(raw: &'a RawRecord) -> Self {
        let mut by_key = BTreeMap::new();
        for (key, value) in raw {
            by_key.entry(lookup_form(key)).or_insert(value);
        }
        Self { by_key }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.by_key
            .get(key)
            .and_then(|value| value_text(value))
            .filter(|text| !is_missing(text))
    }
}

fn lookup_form(key: &str) -> String {
    key.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .split(|ch: char| ch.is_whitespace() || ch == '-' || ch == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .filter_map(value_text)
                .filter(|text| !is_missing(text))
                .collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
    }
}

fn text_or_empty(text: &Text) -> &str {
    text.value().unwrap_or("")
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn format_years(value: f64) -> Text {
    Text::new(value.to_string())
}

fn fill_experience(record: &mut JobRecord, raw: Option<&str>) {
    let Some(raw) = raw else {
        return;
    };
    let years = parse_experience(raw);
    if record.experience_min_years.is_missing() {
        if let Some(min) = years.min {
            record.experience_min_years = format_years(min);
        }
    }
    if record.experience_max_years.is_missing() {
        if let Some(max) = years.max {
            record.experience_max_years = format_years(max);
        }
    }
}

fn fill_salary(record: &mut JobRecord) {
    let Some(raw) = record.compensation.value() else {
        return;
    };
    let salary = parse_salary(raw);
    if record.salary_min.is_missing() {
        if let Some(min) = salary.min {
            record.salary_min = Text::new(min.to_string());
        }
    }
    if record.salary_max.is_missing() {
        if let Some(max) = salary.max {
            record.salary_max = Text::new(max.to_string());
        }
    }
    if record.salary_currency.is_missing() {
        record.salary_currency = Text::from(salary.currency);
    }
    if record.salary_period.is_missing() {
        record.salary_period = Text::from(salary.period);
    }
}
