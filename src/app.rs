use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::collect::Collector;
use crate::config::{PortalConfig, ResolvedConfig};
use crate::error::PipelineError;
use crate::master::{BuildReport, MasterBuilder};
use crate::normalize::{Normalizer, RawRecord};
use crate::quality::{QualityAuditor, QualityReport};
use crate::store::Store;
use crate::upsert::{IngestReport, UpsertStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalSelection {
    All,
    One(String),
}

impl PortalSelection {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" | "all" => PortalSelection::All,
            name => PortalSelection::One(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PortalOutcome {
    Saved(IngestReport),
    Failed { portal: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub path: Utf8PathBuf,
    pub sections: usize,
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub started_at: DateTime<Utc>,
    pub portals: Vec<PortalOutcome>,
    pub master: Option<BuildReport>,
    pub audit: Option<AuditSummary>,
    pub errors: Vec<String>,
}

impl CycleResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// One pipeline: collect, upsert per portal, build the master, audit.
pub struct App {
    config: ResolvedConfig,
    store: Store,
    collectors: BTreeMap<String, Collector>,
}

impl App {
    pub fn new(config: ResolvedConfig) -> Self {
        let store = Store::from_config(&config);
        Self::with_store(config, store)
    }

    pub fn with_store(config: ResolvedConfig, store: Store) -> Self {
        Self {
            config,
            store,
            collectors: BTreeMap::new(),
        }
    }

    /// Registers the collector for a portal; unregistered portals read their export inbox.
    pub fn with_collector(mut self, portal: &str, collector: Collector) -> Self {
        self.collectors.insert(portal.trim().to_lowercase(), collector);
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn run_portal(
        &mut self,
        name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<IngestReport, PipelineError> {
        let portal = self.config.portal(name)?.clone();
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Collect; portal={}", portal.name),
            elapsed: None,
        });

        let store = &self.store;
        let collector = self
            .collectors
            .entry(portal.name.clone())
            .or_insert_with(|| Collector::builtin(&portal, store));
        let pass = collector.start_pass(&portal)?;
        if let Some(urls) = &pass.urls {
            UpsertStore::new(&portal, store).write_collected_urls(urls)?;
        }
        let report = ingest_raw(&portal, store, pass.records)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Upsert; portal={} inserted={} updated={} unchanged={} skipped={} total={}",
                report.portal,
                report.stats.inserted,
                report.stats.updated,
                report.stats.unchanged,
                report.stats.skipped,
                report.total_records
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    /// Normalizes and upserts records that were collected elsewhere.
    pub fn ingest(
        &self,
        name: &str,
        raws: impl IntoIterator<Item = RawRecord>,
    ) -> Result<IngestReport, PipelineError> {
        let portal = self.config.portal(name)?;
        ingest_raw(portal, &self.store, raws)
    }

    pub fn build_master(&self, sink: &dyn ProgressSink) -> Result<BuildReport, PipelineError> {
        let started = Instant::now();
        let report = MasterBuilder::new(&self.config, &self.store).build()?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Master; rows={} outputs={} failed={}",
                report.rows,
                report.outputs.len(),
                report.failed_outputs().count()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn audit(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(QualityReport, Utf8PathBuf), PipelineError> {
        let started = Instant::now();
        let (report, path) = QualityAuditor::new(&self.config, &self.store).run()?;
        sink.event(ProgressEvent {
            message: format!("phase=Audit; sections={} report={path}", report.sections.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok((report, path))
    }

    /// Runs one full cycle. Failures of a portal, an output or the audit are
    /// recorded and the remaining stages still run.
    pub fn run_cycle(
        &mut self,
        selection: &PortalSelection,
        sink: &dyn ProgressSink,
    ) -> Result<CycleResult, PipelineError> {
        let names = match selection {
            PortalSelection::All => self.config.portal_names(),
            PortalSelection::One(name) => vec![self.config.portal(name)?.name.clone()],
        };
        self.store.ensure_data_root()?;

        let mut result = CycleResult {
            started_at: Utc::now(),
            portals: Vec::with_capacity(names.len()),
            master: None,
            audit: None,
            errors: Vec::new(),
        };

        for name in names {
            match self.run_portal(&name, sink) {
                Ok(report) => result.portals.push(PortalOutcome::Saved(report)),
                Err(err) => {
                    error!(portal = %name, "portal run failed: {err}");
                    result.errors.push(format!("{name}: {err}"));
                    result.portals.push(PortalOutcome::Failed {
                        portal: name,
                        error: err.to_string(),
                    });
                }
            }
        }

        match self.build_master(sink) {
            Ok(report) => {
                for failed in report.failed_outputs() {
                    result.errors.push(format!(
                        "master {}: {}",
                        failed.encoding,
                        failed.error.as_deref().unwrap_or("write failed")
                    ));
                }
                result.master = Some(report);
            }
            Err(err) => {
                error!("master build failed: {err}");
                result.errors.push(format!("master: {err}"));
            }
        }

        match self.audit(sink) {
            Ok((report, path)) => {
                let unavailable = report
                    .sections
                    .iter()
                    .filter(|section| section.stats().is_none())
                    .map(|section| section.name.clone())
                    .collect::<Vec<_>>();
                if !unavailable.is_empty() {
                    warn!(sections = ?unavailable, "audit sections unavailable");
                }
                result.audit = Some(AuditSummary {
                    path,
                    sections: report.sections.len(),
                    unavailable,
                });
            }
            Err(err) => {
                error!("quality audit failed: {err}");
                result.errors.push(format!("audit: {err}"));
            }
        }

        Ok(result)
    }
}

fn ingest_raw(
    portal: &PortalConfig,
    store: &Store,
    raws: impl IntoIterator<Item = RawRecord>,
) -> Result<IngestReport, PipelineError> {
    let normalizer = Normalizer::new(portal);
    let upsert = UpsertStore::new(portal, store);

    let mut skipped = 0;
    let records = raws.into_iter().filter_map(|raw| {
        match normalizer.normalize(&raw, Utc::now()) {
            Ok((_, record)) => Some(record),
            Err(err) => {
                debug!(portal = %portal.name, "dropping raw record: {err}");
                skipped += 1;
                None
            }
        }
    });
    let mut report = upsert.ingest(records)?;
    report.stats.skipped += skipped;
    Ok(report)
}
