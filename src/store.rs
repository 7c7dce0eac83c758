use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

use crate::config::{ReportFormat, ResolvedConfig};
use crate::error::PipelineError;
use crate::export::Encoding;

pub const MASTER_STEM: &str = "jobs_master";
pub const REPORT_STEM: &str = "quality_report";

/// Where every persisted artifact lives.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Option<Utf8PathBuf>,
}

impl Store {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new_with_paths(config.data_dir.clone(), config.cache_dir.clone())
    }

    pub fn new_with_paths(data_root: Utf8PathBuf, cache_root: Option<Utf8PathBuf>) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> Option<&Utf8Path> {
        self.cache_root.as_deref()
    }

    pub fn portal_dataset_path(&self, portal: &str) -> Utf8PathBuf {
        self.data_root.join(format!("{portal}_jobs.json"))
    }

    pub fn portal_audit_path(&self, portal: &str) -> Utf8PathBuf {
        self.data_root
            .join("_internal")
            .join(format!("{portal}_keys_latest.txt"))
    }

    pub fn portal_urls_path(&self, portal: &str) -> Utf8PathBuf {
        self.data_root
            .join("_internal")
            .join(format!("{portal}_urls_latest.txt"))
    }

    pub fn master_path(&self, encoding: Encoding) -> Utf8PathBuf {
        self.data_root
            .join(format!("{MASTER_STEM}.{}", encoding.extension()))
    }

    pub fn report_path(&self, format: ReportFormat) -> Utf8PathBuf {
        self.data_root
            .join(format!("{REPORT_STEM}.{}", format.extension()))
    }

    /// Mirror location of `path` inside the cache root, if one is configured.
    pub fn cache_path_for(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        let cache_root = self.cache_root.as_ref()?;
        let relative = path
            .strip_prefix(&self.data_root)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|_| Utf8PathBuf::from(path.file_name().unwrap_or("artifact")));
        Some(cache_root.join(relative))
    }

    pub fn quarantine_path(path: &Utf8Path, at: DateTime<Utc>) -> Utf8PathBuf {
        let file_name = path.file_name().unwrap_or("dataset");
        path.with_file_name(format!(
            "{file_name}.corrupted-{}",
            at.format("%Y%m%dT%H%M%S")
        ))
    }

    pub fn ensure_data_root(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))
    }
}
