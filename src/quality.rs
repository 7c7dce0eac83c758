use std::fs;
use std::io::ErrorKind;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::atomic::AtomicWriter;
use crate::config::{ReportFormat, ResolvedConfig};
use crate::dataset::PortalDataset;
use crate::domain::is_missing;
use crate::error::PipelineError;
use crate::export::{Encoding, Sheet, Table, decode_delimited, encode_workbook};
use crate::master::GLOBAL_KEY_COLUMN;
use crate::store::Store;

/// Identity and headline columns; everything else counts as optional.
pub const CORE_COLUMNS: [&str; 9] = [
    "global_key",
    "job_id",
    "job_url",
    "source",
    "title",
    "company",
    "location",
    "category_primary",
    "scraped_at",
];

pub const HIGH_MISSING_PCT: f64 = 70.0;

pub const MASTER_SECTION: &str = "master";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionStats {
    pub rows: usize,
    pub columns: usize,
    pub overall_sparsity_pct: f64,
    pub core_sparsity_pct: f64,
    pub optional_sparsity_pct: f64,
    /// Sorted by percentage, highest first.
    pub missing_by_column: Vec<ColumnMissing>,
    pub columns_above_70pct_missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionStatus {
    Available(SectionStats),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Portal,
    Master,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub name: String,
    pub kind: SectionKind,
    pub file: Utf8PathBuf,
    #[serde(flatten)]
    pub status: SectionStatus,
}

impl ReportSection {
    pub fn stats(&self) -> Option<&SectionStats> {
        match &self.status {
            SectionStatus::Available(stats) => Some(stats),
            SectionStatus::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<ReportSection>,
}

impl QualityReport {
    pub fn section(&self, name: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|section| section.name == name)
    }
}

/// Completeness statistics of one table. Empty tables report zero sparsity.
pub fn measure(table: &Table) -> SectionStats {
    let rows = table.rows.len();
    let mut missing_by_column = Vec::with_capacity(table.columns.len());
    let (mut core_missing, mut core_cells) = (0usize, 0usize);
    let (mut optional_missing, mut optional_cells) = (0usize, 0usize);

    for (idx, column) in table.columns.iter().enumerate() {
        let missing = table
            .rows
            .iter()
            .filter(|row| row.get(idx).is_none_or(|cell| is_missing(cell)))
            .count();
        if CORE_COLUMNS.contains(&column.as_str()) {
            core_missing += missing;
            core_cells += rows;
        } else {
            optional_missing += missing;
            optional_cells += rows;
        }
        missing_by_column.push(ColumnMissing {
            column: column.clone(),
            missing,
            pct: percent(missing, rows),
        });
    }

    missing_by_column.sort_by(|a, b| b.pct.total_cmp(&a.pct).then_with(|| a.column.cmp(&b.column)));
    let columns_above_70pct_missing = missing_by_column
        .iter()
        .filter(|entry| entry.pct > HIGH_MISSING_PCT)
        .map(|entry| entry.column.clone())
        .collect();

    SectionStats {
        rows,
        columns: table.columns.len(),
        overall_sparsity_pct: percent(core_missing + optional_missing, core_cells + optional_cells),
        core_sparsity_pct: percent(core_missing, core_cells),
        optional_sparsity_pct: percent(optional_missing, optional_cells),
        missing_by_column,
        columns_above_70pct_missing,
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let pct = part as f64 * 100.0 / whole as f64;
    (pct * 100.0).round() / 100.0
}

/// Reads portal and master outputs and reports their completeness.
#[derive(Debug, Clone)]
pub struct QualityAuditor {
    store: Store,
    writer: AtomicWriter,
    portals: Vec<String>,
    master_encodings: Vec<Encoding>,
    format: ReportFormat,
}

impl QualityAuditor {
    pub fn new(config: &ResolvedConfig, store: &Store) -> Self {
        Self {
            store: store.clone(),
            writer: AtomicWriter::for_store(store),
            portals: config.portal_names(),
            master_encodings: config.master_encodings.clone(),
            format: config.report_format,
        }
    }

    pub fn audit(&self) -> QualityReport {
        self.audit_at(Utc::now())
    }

    pub fn audit_at(&self, generated_at: DateTime<Utc>) -> QualityReport {
        let mut sections = Vec::with_capacity(self.portals.len() + 1);
        for portal in &self.portals {
            let file = self.store.portal_dataset_path(portal);
            let status = match PortalDataset::read(&file) {
                Ok(dataset) => SectionStatus::Available(measure(&dataset.to_table())),
                Err(err) => unavailable(portal, err),
            };
            sections.push(ReportSection {
                name: portal.clone(),
                kind: SectionKind::Portal,
                file,
                status,
            });
        }
        sections.push(self.master_section());
        QualityReport {
            generated_at,
            sections,
        }
    }

    /// Audits and writes the report; returns the report and where it went.
    pub fn run(&self) -> Result<(QualityReport, Utf8PathBuf), PipelineError> {
        let report = self.audit();
        let path = self.store.report_path(self.format);
        let bytes = match self.format {
            ReportFormat::Json => serde_json::to_vec_pretty(&report)
                .map_err(|err| PipelineError::Encoding(err.to_string()))?,
            ReportFormat::Xlsx => encode_workbook(&report_sheets(&report))?,
        };
        self.writer.write_bytes(&path, &bytes)?;
        info!(file = %path, sections = report.sections.len(), "quality report written");
        Ok((report, path))
    }

    fn master_section(&self) -> ReportSection {
        let delimited = [Encoding::Csv, Encoding::Tsv]
            .into_iter()
            .find(|encoding| self.master_encodings.contains(encoding));
        let Some(encoding) = delimited else {
            return ReportSection {
                name: MASTER_SECTION.to_string(),
                kind: SectionKind::Master,
                file: self.store.master_path(Encoding::Xlsx),
                status: SectionStatus::Unavailable {
                    reason: "no delimited master encoding configured".to_string(),
                },
            };
        };

        let file = self.store.master_path(encoding);
        let delimiter = if encoding == Encoding::Tsv { b'\t' } else { b',' };
        let status = match fs::read(file.as_std_path()) {
            Ok(bytes) => match decode_delimited(&bytes, delimiter) {
                Ok(table) if table.column_index(GLOBAL_KEY_COLUMN).is_none() => unavailable(
                    MASTER_SECTION,
                    PipelineError::CorruptedDataset {
                        path: file.clone(),
                        message: format!("no `{GLOBAL_KEY_COLUMN}` column"),
                    },
                ),
                Ok(table) => SectionStatus::Available(measure(&table)),
                Err(err) => unavailable(MASTER_SECTION, err),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                unavailable(MASTER_SECTION, PipelineError::MissingSourceFile(file.clone()))
            }
            Err(err) => unavailable(MASTER_SECTION, PipelineError::Filesystem(err.to_string())),
        };
        ReportSection {
            name: MASTER_SECTION.to_string(),
            kind: SectionKind::Master,
            file,
            status,
        }
    }
}

fn unavailable(name: &str, err: PipelineError) -> SectionStatus {
    warn!(section = name, "section unavailable: {err}");
    SectionStatus::Unavailable {
        reason: err.to_string(),
    }
}

fn report_sheets(report: &QualityReport) -> Vec<Sheet> {
    let mut summary = Table::new(
        [
            "section",
            "status",
            "rows",
            "columns",
            "overall_sparsity_pct",
            "core_sparsity_pct",
            "optional_sparsity_pct",
            "columns_above_70pct_missing",
        ]
        .map(str::to_string)
        .to_vec(),
    );
    let mut sheets = Vec::new();
    for section in &report.sections {
        match &section.status {
            SectionStatus::Available(stats) => {
                summary.rows.push(vec![
                    section.name.clone(),
                    "available".to_string(),
                    stats.rows.to_string(),
                    stats.columns.to_string(),
                    format!("{:.2}", stats.overall_sparsity_pct),
                    format!("{:.2}", stats.core_sparsity_pct),
                    format!("{:.2}", stats.optional_sparsity_pct),
                    stats.columns_above_70pct_missing.join(", "),
                ]);
                let mut detail = Table::new(
                    ["column", "missing", "pct"].map(str::to_string).to_vec(),
                );
                detail.rows = stats
                    .missing_by_column
                    .iter()
                    .map(|entry| {
                        vec![
                            entry.column.clone(),
                            entry.missing.to_string(),
                            format!("{:.2}", entry.pct),
                        ]
                    })
                    .collect();
                sheets.push(Sheet {
                    name: section.name.clone(),
                    table: detail,
                });
            }
            SectionStatus::Unavailable { reason } => {
                let mut row = vec![section.name.clone(), format!("unavailable: {reason}")];
                row.resize(summary.columns.len(), String::new());
                summary.rows.push(row);
            }
        }
    }
    sheets.insert(
        0,
        Sheet {
            name: "summary".to_string(),
            table: summary,
        },
    );
    sheets
}
