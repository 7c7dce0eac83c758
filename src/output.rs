use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{CycleResult, PortalOutcome, ProgressEvent, ProgressSink};
use crate::master::BuildReport;
use crate::quality::QualityReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_cycle(result: &CycleResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_build(result: &BuildReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(result: &QualityReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_cycle_summary(result: &CycleResult) {
    println!("cycle started {}", result.started_at.to_rfc3339());
    for outcome in &result.portals {
        match outcome {
            PortalOutcome::Saved(report) => println!(
                "  {:<12} +{} ~{} ={} skipped {} -> {} records",
                report.portal,
                report.stats.inserted,
                report.stats.updated,
                report.stats.unchanged,
                report.stats.skipped,
                report.total_records
            ),
            PortalOutcome::Failed { portal, error } => {
                println!("  {portal:<12} failed: {error}")
            }
        }
    }
    if let Some(master) = &result.master {
        print_build_summary(master);
    }
    if let Some(audit) = &result.audit {
        println!("  audit        {} sections -> {}", audit.sections, audit.path);
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
}

pub fn print_build_summary(report: &BuildReport) {
    println!("  master       {} rows", report.rows);
    for output in &report.outputs {
        match &output.error {
            None => println!("    {:<5} {}", output.encoding, output.path),
            Some(error) => println!("    {:<5} failed: {error}", output.encoding),
        }
    }
}

pub fn print_report_summary(report: &QualityReport) {
    for section in &report.sections {
        match section.stats() {
            Some(stats) => println!(
                "  {:<12} rows {:>6}  sparsity {:>6.2}%  core {:>6.2}%  optional {:>6.2}%",
                section.name,
                stats.rows,
                stats.overall_sparsity_pct,
                stats.core_sparsity_pct,
                stats.optional_sparsity_pct
            ),
            None => println!("  {:<12} unavailable", section.name),
        }
    }
}
