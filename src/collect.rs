//! Collector seams.
//!
//! Discovering and parsing postings happens outside this crate. Collectors
//! plug in through one of two capabilities and hand over raw records; the
//! pipeline never branches on which one produced them.

use std::collections::HashSet;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::PipelineError;
use crate::normalize::{Normalizer, RawRecord};
use crate::store::Store;

/// Listing pages yield posting URLs; each URL is parsed on its own.
pub trait UrlListing {
    fn collect_job_urls(&mut self, portal: &PortalConfig) -> Result<Vec<String>, PipelineError>;

    /// `Ok(None)` means the posting could not be parsed and is skipped.
    fn parse_job_detail(&mut self, url: &str) -> Result<Option<RawRecord>, PipelineError>;
}

/// Structured sources that return all rows at once.
pub trait BulkRowProvider {
    fn collect_rows(&mut self, portal: &PortalConfig) -> Result<Vec<RawRecord>, PipelineError>;
}

pub enum Collector {
    Listing(Box<dyn UrlListing>),
    Rows(Box<dyn BulkRowProvider>),
}

impl Collector {
    /// Collector used when nothing else is registered: the portal's export inbox.
    pub fn builtin(portal: &PortalConfig, store: &Store) -> Self {
        Collector::Rows(Box::new(ExportDirectory::for_portal(portal, store)))
    }

    /// Starts one collection pass.
    ///
    /// Listing collectors are driven lazily, one detail page per record, capped
    /// at the portal's `limit`. Detail failures are logged and skipped. A
    /// detail record without a usable `job_url` takes the listing URL.
    pub fn start_pass<'a>(
        &'a mut self,
        portal: &PortalConfig,
    ) -> Result<CollectionPass<'a>, PipelineError> {
        match self {
            Collector::Rows(provider) => Ok(CollectionPass {
                urls: None,
                records: Box::new(provider.collect_rows(portal)?.into_iter()),
            }),
            Collector::Listing(listing) => {
                let mut seen = HashSet::new();
                let urls = listing
                    .collect_job_urls(portal)?
                    .into_iter()
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty() && seen.insert(url.clone()))
                    .take(portal.limit as usize)
                    .collect::<Vec<_>>();
                info!(portal = %portal.name, urls = urls.len(), "collected listing urls");

                let normalizer = Normalizer::new(portal);
                let records = urls.clone().into_iter().filter_map(move |url| {
                    match listing.parse_job_detail(&url) {
                        Ok(Some(mut raw)) => {
                            if normalizer.fill_missing(&mut raw, "job_url", &url) {
                                debug!(url = %url, "detail page had no job url; using listing url");
                            }
                            Some(raw)
                        }
                        Ok(None) => {
                            debug!(url = %url, "detail page yielded nothing");
                            None
                        }
                        Err(err) => {
                            warn!(url = %url, "detail page failed: {err}");
                            None
                        }
                    }
                });
                Ok(CollectionPass {
                    urls: Some(urls),
                    records: Box::new(records),
                })
            }
        }
    }
}

/// One collection pass: the listing URLs it discovered, if the collector
/// works from a listing, and the raw records produced from them.
pub struct CollectionPass<'a> {
    pub urls: Option<Vec<String>>,
    pub records: Box<dyn Iterator<Item = RawRecord> + 'a>,
}

/// Reads the newest CSV or JSON export dropped into a directory.
#[derive(Debug, Clone)]
pub struct ExportDirectory {
    dir: Utf8PathBuf,
}

impl ExportDirectory {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `inbox_dir` from the portal config, else `{data_dir}/inbox/{portal}`.
    pub fn for_portal(portal: &PortalConfig, store: &Store) -> Self {
        let dir = portal
            .inbox_dir
            .clone()
            .unwrap_or_else(|| store.data_root().join("inbox").join(&portal.name));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn newest_export(&self) -> Result<Option<Utf8PathBuf>, PipelineError> {
        let entries = match fs::read_dir(self.dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PipelineError::Collector(format!("{}: {err}", self.dir))),
        };

        let mut newest: Option<(SystemTime, Utf8PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Collector(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let is_export = path
                .extension()
                .map(|ext| matches!(ext.to_lowercase().as_str(), "csv" | "json"))
                .unwrap_or(false);
            if !is_export || !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let candidate = (modified, path);
            if newest.as_ref().is_none_or(|current| candidate > *current) {
                newest = Some(candidate);
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

impl BulkRowProvider for ExportDirectory {
    fn collect_rows(&mut self, portal: &PortalConfig) -> Result<Vec<RawRecord>, PipelineError> {
        let Some(path) = self.newest_export()? else {
            info!(portal = %portal.name, dir = %self.dir, "no export found");
            return Ok(Vec::new());
        };
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| PipelineError::Collector(format!("read {path}: {err}")))?;
        let rows = if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            read_json_rows(&path, &bytes)?
        } else {
            read_csv_rows(&path, &bytes)?
        };
        info!(portal = %portal.name, file = %path, rows = rows.len(), "read export");
        Ok(rows)
    }
}

fn read_csv_rows(path: &Utf8Path, bytes: &[u8]) -> Result<Vec<RawRecord>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|err| PipelineError::Collector(format!("{path}: {err}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| PipelineError::Collector(format!("{path}: {err}")))?;
        let mut raw = RawRecord::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            raw.insert(header.to_string(), Value::String(value.to_string()));
        }
        rows.push(raw);
    }
    Ok(rows)
}

fn read_json_rows(path: &Utf8Path, bytes: &[u8]) -> Result<Vec<RawRecord>, PipelineError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| PipelineError::Collector(format!("{path}: {err}")))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("records") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(PipelineError::Collector(format!(
                    "{path}: expected an array or an object with `records`"
                )));
            }
        },
        _ => {
            return Err(PipelineError::Collector(format!(
                "{path}: expected an array of objects"
            )));
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(raw) => Some(raw),
            _ => None,
        })
        .collect())
}
