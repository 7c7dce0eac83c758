use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Literal stored for every field without a determinable value.
pub const PLACEHOLDER: &str = "Non";

const MISSING_MARKERS: [&str; 16] = [
    "Non", "non", "N/A", "n/a", "na", "NA", "-", "—", "None", "NONE", "<NA>", "<na>", "nan",
    "NaN", "NULL", "null",
];

/// True for empty strings and every spelling of "no value" seen in collector output.
pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || MISSING_MARKERS.contains(&trimmed)
}

/// Collapses whitespace runs and trims.
pub fn clean(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A cleaned text cell that is never absent: missing input becomes [`PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub struct Text(String);

impl Text {
    pub fn new(value: impl AsRef<str>) -> Self {
        let cleaned = clean(value.as_ref());
        if is_missing(&cleaned) {
            Self::missing()
        } else {
            Self(cleaned)
        }
    }

    pub fn missing() -> Self {
        Self(PLACEHOLDER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_missing(&self) -> bool {
        self.0 == PLACEHOLDER
    }

    pub fn value(&self) -> Option<&str> {
        (!self.is_missing()).then_some(self.0.as_str())
    }
}

impl Default for Text {
    fn default() -> Self {
        Self::missing()
    }
}

impl From<Option<String>> for Text {
    fn from(value: Option<String>) -> Self {
        value.map(Text::new).unwrap_or_default()
    }
}

impl From<Text> for String {
    fn from(value: Text) -> Self {
        value.0
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Text::new(value)
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum WorkMode {
    Remote,
    Hybrid,
    Onsite,
    #[default]
    Unknown,
}

impl WorkMode {
    /// Reads an explicit value such as "Remote", "On-site" or "work from home".
    pub fn parse_lenient(value: &str) -> Self {
        let lowered = clean(value).to_lowercase();
        match lowered.as_str() {
            "remote" | "wfh" | "work from home" | "fully remote" => WorkMode::Remote,
            "hybrid" => WorkMode::Hybrid,
            "onsite" | "on-site" | "on site" | "office" | "in office" => WorkMode::Onsite,
            _ => WorkMode::Unknown,
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkMode::Remote => write!(f, "remote"),
            WorkMode::Hybrid => write!(f, "hybrid"),
            WorkMode::Onsite => write!(f, "onsite"),
            WorkMode::Unknown => write!(f, "{PLACEHOLDER}"),
        }
    }
}

impl From<Option<String>> for WorkMode {
    fn from(value: Option<String>) -> Self {
        value
            .map(|value| WorkMode::parse_lenient(&value))
            .unwrap_or_default()
    }
}

impl From<WorkMode> for String {
    fn from(value: WorkMode) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Category {
    It,
    NonIt,
    #[default]
    Unknown,
}

impl Category {
    pub fn parse_lenient(value: &str) -> Self {
        let lowered = clean(value).to_lowercase();
        match lowered.as_str() {
            "it" => Category::It,
            "non-it" | "non it" | "nonit" => Category::NonIt,
            _ => Category::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::It => write!(f, "IT"),
            Category::NonIt => write!(f, "Non-IT"),
            Category::Unknown => write!(f, "{PLACEHOLDER}"),
        }
    }
}

impl From<Option<String>> for Category {
    fn from(value: Option<String>) -> Self {
        value
            .map(|value| Category::parse_lenient(&value))
            .unwrap_or_default()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.to_string()
    }
}

/// Text-valued canonical fields, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldName {
    JobId,
    JobUrl,
    Source,
    Title,
    Company,
    CompanyLink,
    Location,
    Country,
    PostedDate,
    NumApplicants,
    EmploymentType,
    Position,
    Type,
    Compensation,
    Commitment,
    Skills,
    Industry,
    Level,
    ExperienceMinYears,
    ExperienceMaxYears,
    SalaryMin,
    SalaryMax,
    SalaryCurrency,
    SalaryPeriod,
    Deadline,
}

impl FieldName {
    pub const ALL: [FieldName; 25] = [
        FieldName::JobId,
        FieldName::JobUrl,
        FieldName::Source,
        FieldName::Title,
        FieldName::Company,
        FieldName::CompanyLink,
        FieldName::Location,
        FieldName::Country,
        FieldName::PostedDate,
        FieldName::NumApplicants,
        FieldName::EmploymentType,
        FieldName::Position,
        FieldName::Type,
        FieldName::Compensation,
        FieldName::Commitment,
        FieldName::Skills,
        FieldName::Industry,
        FieldName::Level,
        FieldName::ExperienceMinYears,
        FieldName::ExperienceMaxYears,
        FieldName::SalaryMin,
        FieldName::SalaryMax,
        FieldName::SalaryCurrency,
        FieldName::SalaryPeriod,
        FieldName::Deadline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::JobId => "job_id",
            FieldName::JobUrl => "job_url",
            FieldName::Source => "source",
            FieldName::Title => "title",
            FieldName::Company => "company",
            FieldName::CompanyLink => "company_link",
            FieldName::Location => "location",
            FieldName::Country => "country",
            FieldName::PostedDate => "posted_date",
            FieldName::NumApplicants => "num_applicants",
            FieldName::EmploymentType => "employment_type",
            FieldName::Position => "position",
            FieldName::Type => "type",
            FieldName::Compensation => "compensation",
            FieldName::Commitment => "commitment",
            FieldName::Skills => "skills",
            FieldName::Industry => "industry",
            FieldName::Level => "level",
            FieldName::ExperienceMinYears => "experience_min_years",
            FieldName::ExperienceMaxYears => "experience_max_years",
            FieldName::SalaryMin => "salary_min",
            FieldName::SalaryMax => "salary_max",
            FieldName::SalaryCurrency => "salary_currency",
            FieldName::SalaryPeriod => "salary_period",
            FieldName::Deadline => "deadline",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        FieldName::ALL
            .into_iter()
            .find(|field| field.as_str() == name)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column order of a persisted record.
pub const RECORD_COLUMNS: [&str; 28] = [
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
];

/// One normalized posting.
///
/// Every text field is a [`Text`], so an absent value is always the placeholder
/// and never a missing cell. Fields absent from an older dataset file load as
/// the placeholder too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    pub job_id: Text,
    pub job_url: Text,
    pub source: Text,
    pub title: Text,
    pub company: Text,
    pub company_link: Text,
    pub location: Text,
    pub country: Text,
    pub posted_date: Text,
    pub num_applicants: Text,
    pub work_mode: WorkMode,
    pub employment_type: Text,
    pub position: Text,
    #[serde(rename = "type")]
    pub kind: Text,
    pub compensation: Text,
    pub commitment: Text,
    pub skills: Text,
    pub category_primary: Category,
    pub industry: Text,
    pub level: Text,
    pub experience_min_years: Text,
    pub experience_max_years: Text,
    pub salary_min: Text,
    pub salary_max: Text,
    pub salary_currency: Text,
    pub salary_period: Text,
    pub deadline: Text,
    pub scraped_at: DateTime<Utc>,
}

impl Default for JobRecord {
    // A record without a timestamp is older than anything a collector produces.
    fn default() -> Self {
        Self::empty(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl JobRecord {
    pub fn empty(scraped_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Text::missing(),
            job_url: Text::missing(),
            source: Text::missing(),
            title: Text::missing(),
            company: Text::missing(),
            company_link: Text::missing(),
            location: Text::missing(),
            country: Text::missing(),
            posted_date: Text::missing(),
            num_applicants: Text::missing(),
            work_mode: WorkMode::Unknown,
            employment_type: Text::missing(),
            position: Text::missing(),
            kind: Text::missing(),
            compensation: Text::missing(),
            commitment: Text::missing(),
            skills: Text::missing(),
            category_primary: Category::Unknown,
            industry: Text::missing(),
            level: Text::missing(),
            experience_min_years: Text::missing(),
            experience_max_years: Text::missing(),
            salary_min: Text::missing(),
            salary_max: Text::missing(),
            salary_currency: Text::missing(),
            salary_period: Text::missing(),
            deadline: Text::missing(),
            scraped_at,
        }
    }

    pub fn field(&self, name: FieldName) -> &Text {
        match name {
            FieldName::JobId => &self.job_id,
            FieldName::JobUrl => &self.job_url,
            FieldName::Source => &self.source,
            FieldName::Title => &self.title,
            FieldName::Company => &self.company,
            FieldName::CompanyLink => &self.company_link,
            FieldName::Location => &self.location,
            FieldName::Country => &self.country,
            FieldName::PostedDate => &self.posted_date,
            FieldName::NumApplicants => &self.num_applicants,
            FieldName::EmploymentType => &self.employment_type,
            FieldName::Position => &self.position,
            FieldName::Type => &self.kind,
            FieldName::Compensation => &self.compensation,
            FieldName::Commitment => &self.commitment,
            FieldName::Skills => &self.skills,
            FieldName::Industry => &self.industry,
            FieldName::Level => &self.level,
            FieldName::ExperienceMinYears => &self.experience_min_years,
            FieldName::ExperienceMaxYears => &self.experience_max_years,
            FieldName::SalaryMin => &self.salary_min,
            FieldName::SalaryMax => &self.salary_max,
            FieldName::SalaryCurrency => &self.salary_currency,
            FieldName::SalaryPeriod => &self.salary_period,
            FieldName::Deadline => &self.deadline,
        }
    }

    pub fn field_mut(&mut self, name: FieldName) -> &mut Text {
        match name {
            FieldName::JobId => &mut self.job_id,
            FieldName::JobUrl => &mut self.job_url,
            FieldName::Source => &mut self.source,
            FieldName::Title => &mut self.title,
            FieldName::Company => &mut self.company,
            FieldName::CompanyLink => &mut self.company_link,
            FieldName::Location => &mut self.location,
            FieldName::Country => &mut self.country,
            FieldName::PostedDate => &mut self.posted_date,
            FieldName::NumApplicants => &mut self.num_applicants,
            FieldName::EmploymentType => &mut self.employment_type,
            FieldName::Position => &mut self.position,
            FieldName::Type => &mut self.kind,
            FieldName::Compensation => &mut self.compensation,
            FieldName::Commitment => &mut self.commitment,
            FieldName::Skills => &mut self.skills,
            FieldName::Industry => &mut self.industry,
            FieldName::Level => &mut self.level,
            FieldName::ExperienceMinYears => &mut self.experience_min_years,
            FieldName::ExperienceMaxYears => &mut self.experience_max_years,
            FieldName::SalaryMin => &mut self.salary_min,
            FieldName::SalaryMax => &mut self.salary_max,
            FieldName::SalaryCurrency => &mut self.salary_currency,
            FieldName::SalaryPeriod => &mut self.salary_period,
            FieldName::Deadline => &mut self.deadline,
        }
    }

    /// Cells in [`RECORD_COLUMNS`] order.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = Vec::with_capacity(RECORD_COLUMNS.len());
        for column in RECORD_COLUMNS {
            let cell = match column {
                "work_mode" => self.work_mode.to_string(),
                "category_primary" => self.category_primary.to_string(),
                "scraped_at" => format_timestamp(&self.scraped_at),
                other => FieldName::from_name(other)
                    .map(|name| self.field(name).to_string())
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
            };
            cells.push(cell);
        }
        cells
    }
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Per-portal dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalKey(String);

impl PortalKey {
    /// Derives the key of `record` as collected by `portal`.
    ///
    /// A usable `job_url` is the key. Without one, a hash of the job id, or of
    /// title, company and location, is prefixed with the portal name, so two
    /// collections of the same posting land on the same key.
    pub fn derive(portal: &str, record: &JobRecord) -> Result<Self, PipelineError> {
        if let Some(url) = usable_url(&record.job_url) {
            return Ok(Self(url.to_string()));
        }

        let portal = portal.trim().to_lowercase();
        if let Some(job_id) = record.job_id.value() {
            return Ok(Self(format!(
                "{portal}:{}",
                identity_hash(&[portal.as_str(), "id", job_id])
            )));
        }

        let parts = [&record.title, &record.company, &record.location];
        if parts.iter().all(|part| part.is_missing()) {
            return Err(PipelineError::MissingIdentity(format!(
                "{portal}: no url, job id, title, company or location"
            )));
        }
        let title = record.title.as_str().to_lowercase();
        let company = record.company.as_str().to_lowercase();
        let location = record.location.as_str().to_lowercase();
        Ok(Self(format!(
            "{portal}:{}",
            identity_hash(&[
                portal.as_str(),
                title.as_str(),
                company.as_str(),
                location.as_str(),
            ])
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-portal dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalKey(String);

impl GlobalKey {
    /// A record with a usable URL is keyed by the normalized URL, so the same
    /// posting reached through two portals unifies. Otherwise the portal key is
    /// used as is; synthetic portal keys already carry the portal prefix.
    pub fn derive(record: &JobRecord, portal_key: &PortalKey) -> Self {
        match usable_url(&record.job_url) {
            Some(url) => Self(normalize_url(url)),
            None => Self(portal_key.as_str().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlobalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn usable_url(value: &Text) -> Option<&str> {
    value
        .value()
        .filter(|url| !url.chars().any(char::is_whitespace))
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        url.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn identity_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record() -> JobRecord {
        JobRecord::empty(Utc::now())
    }

    #[test]
    fn text_collapses_whitespace_and_placeholders() {
        assert_eq!(Text::new("  Senior   Engineer \n").as_str(), "Senior Engineer");
        assert!(Text::new("N/A").is_missing());
        assert!(Text::new("   ").is_missing());
        assert_eq!(Text::new("nan").as_str(), PLACEHOLDER);
    }

    #[test]
    fn portal_key_prefers_url() {
        let mut job = record();
        job.job_url = Text::new("https://merojob.com/jobs/42/");
        job.title = Text::new("Accountant");
        let key = PortalKey::derive("merojob", &job).unwrap();
        assert_eq!(key.as_str(), "https://merojob.com/jobs/42/");

        let global = GlobalKey::derive(&job, &key);
        assert_eq!(global.as_str(), "https://merojob.com/jobs/42");
    }

    #[test]
    fn synthetic_key_is_stable_and_prefixed() {
        let mut a = record();
        a.title = Text::new("Data Analyst");
        a.company = Text::new("Acme");
        a.location = Text::new("Kathmandu");
        let mut b = a.clone();
        b.title = Text::new("  DATA   analyst ");
        b.scraped_at = Utc::now();

        let ka = PortalKey::derive("LinkedIn", &a).unwrap();
        let kb = PortalKey::derive("linkedin", &b).unwrap();
        assert_eq!(ka, kb);
        assert!(ka.as_str().starts_with("linkedin:"));
    }

    #[test]
    fn url_with_whitespace_falls_back_to_synthetic_key() {
        let mut job = record();
        job.job_url = Text::new("see listing");
        job.job_id = Text::new("991");
        let key = PortalKey::derive("jobsnepal", &job).unwrap();
        assert!(key.as_str().starts_with("jobsnepal:"));
    }

    #[test]
    fn no_identity_is_an_error() {
        let err = PortalKey::derive("merojob", &record()).unwrap_err();
        assert_matches!(err, PipelineError::MissingIdentity(_));
    }

    #[test]
    fn enums_render_placeholder_when_unknown() {
        assert_eq!(WorkMode::Unknown.to_string(), PLACEHOLDER);
        assert_eq!(Category::Unknown.to_string(), PLACEHOLDER);
        assert_eq!(WorkMode::parse_lenient("On-site"), WorkMode::Onsite);
        assert_eq!(Category::parse_lenient("Non-IT"), Category::NonIt);
    }

    #[test]
    fn cells_follow_column_order() {
        let mut job = record();
        job.title = Text::new("Driver");
        let cells = job.cells();
        assert_eq!(cells.len(), RECORD_COLUMNS.len());
        let title_idx = RECORD_COLUMNS.iter().position(|c| *c == "title").unwrap();
        assert_eq!(cells[title_idx], "Driver");
        assert!(cells.iter().all(|cell| !cell.is_empty()));
    }
}
