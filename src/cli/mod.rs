//! Command-line interface for the EVT filtering pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

use crate::config::{FilterParams, PipelineConfig};
use crate::core::locator::{self, FileRef, FileSource, LocalSource, RemoteSource, Source};
use crate::core::progress::RunSummary;
use crate::db::SqliteSink;
use crate::processors::pipeline::{self, RunOptions};
use crate::remote::{self, RemoteError};

#[derive(Parser, Debug)]
#[command(
    name = "evt-pipeline",
    version,
    about = "Filter SeaFlow EVT files for optically focused particles"
)]
struct Cli {
    /// Directory of EVT files to filter
    #[arg(short = 'e', long)]
    evt_dir: Option<PathBuf>,

    /// Read EVT files from the remote store configured in --config
    #[arg(short = 's', long)]
    s3: bool,

    /// Cruise name
    #[arg(short = 'c', long)]
    cruise: String,

    /// SQLite database file for results
    #[arg(short = 'd', long)]
    db: PathBuf,

    /// Also write focused particles as binary OPP files below this directory
    #[arg(short = 'o', long)]
    opp_dir: Option<PathBuf>,

    /// Only process the first N files
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// D1 notch ratio; derived from the data when omitted
    #[arg(long)]
    notch1: Option<f64>,

    /// D2 notch ratio; derived from the data when omitted
    #[arg(long)]
    notch2: Option<f64>,

    /// Alignment envelope width
    #[arg(long)]
    width: Option<f64>,

    /// Alignment origin; derived from the data when omitted
    #[arg(long)]
    origin: Option<f64>,

    /// Additive signal offset
    #[arg(long)]
    offset: Option<f64>,

    /// Derive missing parameters from the whole cruise in a first pass
    #[arg(short = 't', long)]
    twopass: bool,

    /// Number of worker threads
    #[arg(short = 'p', long)]
    process_count: Option<usize>,

    /// Progress update resolution in percent
    #[arg(short = 'r', long)]
    resolution: Option<f64>,

    /// Optional YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// CLI entry point. Logs fatal errors and exits nonzero.
pub fn run() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = execute(&cli) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn execute(cli: &Cli) -> Result<()> {
    if cli.evt_dir.is_some() == cli.s3 {
        bail!("one of --evt_dir or --s3 must be provided");
    }

    let config = load_config(cli);

    let source_spec = if let Some(dir) = &cli.evt_dir {
        Source::Local(dir.clone())
    } else {
        let remote_config = config
            .remote
            .as_ref()
            .ok_or_else(|| anyhow!("--s3 requires a [remote] section in the config file"))?;
        let store = match remote::open_store(remote_config) {
            Ok(store) => store,
            Err(RemoteError::NoCredentials) => {
                bail!("{}", RemoteError::NoCredentials)
            }
            Err(e) => return Err(e).context("failed to open remote store"),
        };
        Source::Remote(Arc::from(store))
    };

    let files = discover(&source_spec, &cli.cruise, cli.limit)?;
    if files.is_empty() {
        bail!("no EVT files found for cruise '{}'", cli.cruise);
    }
    log::info!("filtering {} files for cruise '{}'", files.len(), cli.cruise);

    let file_source: Arc<dyn FileSource> = match &source_spec {
        Source::Local(_) => Arc::new(LocalSource),
        Source::Remote(store) => Arc::new(RemoteSource::new(Arc::clone(store))),
    };

    let params = merge_params(cli, &config.filter);
    log_params(&params);
    let opts = RunOptions {
        workers: cli.process_count.unwrap_or(config.run.workers),
        resolution: cli.resolution.unwrap_or(config.run.resolution),
        opp_dir: cli.opp_dir.clone(),
        strict_explore: config.run.strict_explore,
        ..RunOptions::default()
    };

    let mut sink = SqliteSink::open(&cli.db)
        .with_context(|| format!("failed to open database '{}'", cli.db.display()))?;

    let summary = if cli.twopass {
        pipeline::two_pass_filter(&files, &params, file_source, &mut sink, &opts)?
    } else {
        pipeline::filter_files(&files, &params, file_source, &mut sink, &opts)?
    };

    print_summary(&cli.cruise, &summary);
    Ok(())
}

/// Load the YAML config when given, falling back to defaults on error the
/// same way a missing file does.
fn load_config(cli: &Cli) -> PipelineConfig {
    match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(config) => {
                log::info!("loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    }
}

/// Log the parameter set before any work starts; unset fields will be
/// derived from the data.
fn log_params(params: &FilterParams) {
    let show = |v: Option<f64>| match v {
        Some(v) => format!("{}", v),
        None => "derived".to_string(),
    };
    log::info!(
        "calibration: notch1={} notch2={} width={} origin={} offset={}",
        show(params.notch1),
        show(params.notch2),
        params.width,
        show(params.origin),
        params.offset
    );
}

/// Command-line flags win over config-file values.
fn merge_params(cli: &Cli, base: &FilterParams) -> FilterParams {
    FilterParams {
        notch1: cli.notch1.or(base.notch1),
        notch2: cli.notch2.or(base.notch2),
        width: cli.width.unwrap_or(base.width),
        origin: cli.origin.or(base.origin),
        offset: cli.offset.unwrap_or(base.offset),
    }
}

/// List candidate files behind a discovery spinner.
fn discover(source: &Source, cruise: &str, limit: Option<usize>) -> Result<Vec<FileRef>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap(),
    );
    spinner.set_message("discovering EVT files...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let files = locator::locate(source, cruise, limit);

    spinner.finish_and_clear();
    files.context("file discovery failed")
}

fn print_summary(cruise: &str, summary: &RunSummary) {
    let elapsed = summary.elapsed();
    println!("\n╔══════════════════════════════════════╗");
    println!("║          Filtering Summary           ║");
    println!("╠══════════════════════════════════════╣");
    println!("║ Cruise:    {:<25} ║", truncate(cruise, 25));
    println!("║ Files:     {:<25} ║", summary.files);
    println!("║ Failures:  {:<25} ║", summary.failures);
    println!("║ Particles: {:<25} ║", summary.particles);
    println!("║ Focused:   {:<25} ║", summary.focused);
    println!("║ Elapsed:   {:<25} ║", format!("{:.1}s", elapsed.as_secs_f64()));
    println!("╚══════════════════════════════════════╝");
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
