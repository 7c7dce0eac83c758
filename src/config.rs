use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::export::Encoding;
use crate::normalize::OVERRIDABLE_FIELDS;

pub const DEFAULT_CONFIG_FILE: &str = "jobmerge.json";
pub const MIN_WATCH_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub watch_interval_secs: Option<u64>,
    #[serde(default)]
    pub autosave_every: Option<usize>,
    #[serde(default)]
    pub report_format: Option<ReportFormat>,
    #[serde(default)]
    pub master_encodings: Option<Vec<String>>,
    #[serde(default)]
    pub portals: Vec<PortalEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortalEntry {
    Shorthand(String),
    Detailed(PortalEntryObject),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PortalEntryObject {
    pub name: String,
    #[serde(default)]
    pub mode: Option<CollectionMode>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub inbox_dir: Option<String>,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub autosave_every: Option<usize>,
    #[serde(default)]
    pub column_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Listing pages yield URLs; each URL is parsed separately.
    Listing,
    /// The collector hands over structured rows in bulk.
    Rows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Xlsx,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Xlsx => "xlsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub name: String,
    pub mode: CollectionMode,
    pub country: Option<String>,
    pub inbox_dir: Option<Utf8PathBuf>,
    pub pages: u32,
    pub limit: u32,
    pub autosave_every: usize,
    /// canonical field -> source column name
    pub column_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub cache_dir: Option<Utf8PathBuf>,
    pub pages: u32,
    pub limit: u32,
    pub headless: bool,
    pub watch_interval: Duration,
    pub autosave_every: usize,
    pub report_format: ReportFormat,
    pub master_encodings: Vec<Encoding>,
    pub portals: Vec<PortalConfig>,
}

impl ResolvedConfig {
    pub fn portal(&self, name: &str) -> Result<&PortalConfig, PipelineError> {
        let wanted = name.trim().to_lowercase();
        self.portals
            .iter()
            .find(|portal| portal.name == wanted)
            .ok_or_else(|| PipelineError::UnknownPortal(name.to_string()))
    }

    pub fn portal_names(&self) -> Vec<String> {
        self.portals.iter().map(|portal| portal.name.clone()).collect()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, PipelineError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            info!("no {DEFAULT_CONFIG_FILE} found, using built-in defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|err| PipelineError::ConfigRead {
                path: config_path.clone(),
                message: err.to_string(),
            })?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PipelineError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PipelineError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let pages = config.pages.unwrap_or(20);
        let limit = config.limit.unwrap_or(400);
        let autosave_every = config.autosave_every.unwrap_or(5).max(1);

        let cache_dir = match config.cache_dir.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("auto") => Some(default_cache_dir()?),
            Some(dir) => Some(Utf8PathBuf::from(dir)),
        };

        let master_encodings = match config.master_encodings {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<Encoding>, PipelineError>>()?,
            _ => Encoding::ALL.to_vec(),
        };

        let entries = if config.portals.is_empty() {
            default_portals()
        } else {
            config.portals
        };
        let portals = entries
            .into_iter()
            .map(|entry| resolve_portal(entry, pages, limit, autosave_every))
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let interval = config
            .watch_interval_secs
            .unwrap_or(600)
            .max(MIN_WATCH_INTERVAL_SECS);

        Ok(ResolvedConfig {
            schema_version,
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
            cache_dir,
            pages,
            limit,
            headless: config.headless.unwrap_or(false),
            watch_interval: Duration::from_secs(interval),
            autosave_every,
            report_format: config.report_format.unwrap_or_default(),
            master_encodings,
            portals,
        })
    }
}

pub fn default_portals() -> Vec<PortalEntry> {
    vec![
        PortalEntry::Shorthand("merojob".to_string()),
        PortalEntry::Shorthand("jobsnepal".to_string()),
        PortalEntry::Shorthand("linkedin".to_string()),
    ]
}

/// Mode and country for portals the pipeline knows by name.
fn builtin_profile(name: &str) -> (CollectionMode, Option<&'static str>) {
    match name {
        "merojob" | "jobsnepal" => (CollectionMode::Listing, Some("Nepal")),
        "linkedin" => (CollectionMode::Rows, Some("Nepal")),
        _ => (CollectionMode::Rows, None),
    }
}

fn resolve_portal(
    entry: PortalEntry,
    pages: u32,
    limit: u32,
    autosave_every: usize,
) -> Result<PortalConfig, PipelineError> {
    let object = match entry {
        PortalEntry::Shorthand(name) => PortalEntryObject {
            name,
            ..PortalEntryObject::default()
        },
        PortalEntry::Detailed(object) => object,
    };

    let name = object.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(PipelineError::ConfigParse(
            "portal entry without a name".to_string(),
        ));
    }

    let mut column_overrides = BTreeMap::new();
    for (canonical, source) in object.column_overrides {
        let canonical = canonical.trim().to_lowercase();
        if !OVERRIDABLE_FIELDS.contains(&canonical.as_str()) {
            return Err(PipelineError::ConfigParse(format!(
                "portal {name}: unknown canonical field in column_overrides: {canonical}"
            )));
        }
        column_overrides.insert(canonical, source);
    }

    let (mode, country) = builtin_profile(&name);
    Ok(PortalConfig {
        mode: object.mode.unwrap_or(mode),
        country: object.country.or_else(|| country.map(str::to_string)),
        inbox_dir: object.inbox_dir.map(Utf8PathBuf::from),
        pages: object.pages.unwrap_or(pages),
        limit: object.limit.unwrap_or(limit),
        autosave_every: object.autosave_every.unwrap_or(autosave_every).max(1),
        column_overrides,
        name,
    })
}

fn default_cache_dir() -> Result<Utf8PathBuf, PipelineError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("jobmerge")).ok()
        })
        .ok_or_else(|| PipelineError::Filesystem("unable to resolve cache directory".to_string()))
}
