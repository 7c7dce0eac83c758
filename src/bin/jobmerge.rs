use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use jobmerge::app::{App, PortalSelection, ProgressSink};
use jobmerge::config::{ConfigLoader, MIN_WATCH_INTERVAL_SECS, ResolvedConfig};
use jobmerge::error::PipelineError;
use jobmerge::output::{
    JsonOutput, LogProgress, OutputMode, print_build_summary, print_cycle_summary,
    print_report_summary,
};
use jobmerge::watch::{interrupt_signal, run_watch};

#[derive(Parser)]
#[command(name = "jobmerge")]
#[command(about = "Merge job-posting collections into per-portal datasets and a deduplicated master")]
#[command(version, author)]
struct Cli {
    /// Path to jobmerge.json (defaults to ./jobmerge.json when present)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Collect, upsert, build the master and audit")]
    Run(RunArgs),
    #[command(about = "Rebuild the master dataset from the portal datasets")]
    BuildMaster,
    #[command(about = "Write the quality report for portal and master datasets")]
    Audit,
}

#[derive(Args)]
struct RunArgs {
    /// Portal name, or `all`
    #[arg(long, default_value = "all")]
    portal: String,

    /// Repeat the cycle until interrupted
    #[arg(long)]
    watch: bool,

    /// Seconds between watch cycles
    #[arg(long)]
    interval: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PipelineError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::ConfigRead { .. }
        | PipelineError::ConfigParse(_)
        | PipelineError::UnknownPortal(_)
        | PipelineError::InvalidEncoding(_) => 2,
        PipelineError::PartialWrite { .. } | PipelineError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_pipeline(args, config, output_mode),
        Commands::BuildMaster => {
            let app = App::new(config);
            let report = app.build_master(sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_build(&report).into_diagnostic()?,
                OutputMode::Human => print_build_summary(&report),
            }
            if let Some(failed) = report.failed_outputs().next() {
                return Err(miette::miette!(
                    "master {} not written: {}",
                    failed.encoding,
                    failed.error.as_deref().unwrap_or("unknown error")
                ));
            }
            Ok(())
        }
        Commands::Audit => {
            let app = App::new(config);
            let (report, _) = app.audit(sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
                OutputMode::Human => print_report_summary(&report),
            }
            Ok(())
        }
    }
}

fn run_pipeline(
    args: RunArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let selection = PortalSelection::parse(&args.portal);
    if let PortalSelection::One(name) = &selection {
        config.portal(name)?;
    }
    let interval = args
        .interval
        .map(|secs| Duration::from_secs(secs.max(MIN_WATCH_INTERVAL_SECS)))
        .unwrap_or(config.watch_interval);

    let mut app = App::new(config);
    let sink = sink(output_mode);

    if !args.watch {
        let result = app.run_cycle(&selection, sink)?;
        report_cycle(&result, output_mode)?;
        if !result.is_clean() {
            return Err(miette::miette!("cycle finished with {} error(s)", result.errors.len()));
        }
        return Ok(());
    }

    let signal = interrupt_signal()?;
    run_watch(interval, &signal, |_| {
        let result = app.run_cycle(&selection, sink)?;
        if let Err(err) = report_cycle(&result, output_mode) {
            tracing::warn!("could not print cycle summary: {err:?}");
        }
        Ok(())
    });
    Ok(())
}

fn report_cycle(result: &jobmerge::app::CycleResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_cycle(result).into_diagnostic(),
        OutputMode::Human => {
            print_cycle_summary(result);
            Ok(())
        }
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogProgress,
    }
}
