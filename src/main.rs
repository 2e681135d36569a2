use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use ratatui::DefaultTerminal;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod charts;
mod controller;
mod domain;
mod inputter;
mod loader;
mod model;
mod normalize;
mod parquet;
mod record;
mod session;
mod stats;
mod table;
mod ui;

use controller::Controller;
use domain::{SourceKind, WFVConfig, WFVError};
use loader::{LoadReport, Loader};
use model::{Model, Status};
use parquet::ParquetSource;
use session::Session;
use stats::{compute_correlations, compute_stats, interpret_correlation};
use ui::TableUI;

const MAX_ROWS: u64 = 1000;
const MAX_BINS: u64 = 100;

/// Dashboard for security findings in CI workflow files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Data directory holding workflow_index.json or the parquet tables
    #[arg(long, default_value = "data")]
    data_dir: String,

    #[arg(long, value_enum, default_value_t = SourceKind::Json)]
    source: SourceKind,

    /// Initial rows per page
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=MAX_ROWS))]
    rows: u64,

    /// Number of histogram bins
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=MAX_BINS))]
    bins: u64,

    /// Repository to show. Restricts the scan for parquet ("owner/repo").
    #[arg(long)]
    repo: Option<String>,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// Event poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Command {
    /// Interactive dashboard
    View,
    /// Print stats and correlations and exit
    Summary,
    /// Regenerate workflow_index.json from the directory layout
    Index,
}

fn main() -> ExitCode {
    match run() {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run() -> Result<(), WFVError> {
    let args = Args::parse();

    if let Some(log_file) = &args.log_file {
        init_tracing(&expand_path(log_file)?)?;
    }

    let mut config = WFVConfig::default()
        .with_data_dir(expand_path(&args.data_dir)?)
        .with_source(args.source)
        .with_rows_per_page(args.rows as usize)
        .with_histogram_bins(args.bins as usize)
        .with_event_poll_time(args.poll_ms);
    if let Some(repo) = &args.repo {
        config = config.with_repository(repo.clone());
    }
    info!("Starting wfv with {:?}", config);

    match args.command.unwrap_or(Command::View) {
        Command::View => view(&config),
        Command::Summary => summary(&config),
        Command::Index => {
            let index = loader::build_index(&config.data_dir)?;
            let path = loader::write_index(&config.data_dir, &index)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn init_tracing(log_file: &Path) -> Result<(), WFVError> {
    let file = File::create(log_file)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn expand_path(path: &str) -> Result<PathBuf, WFVError> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| WFVError::LoadingFailed(format!("cannot expand {path}: {e}")))
}

fn load(config: &WFVConfig) -> (LoadReport, Option<Loader>) {
    match config.source {
        SourceKind::Json => {
            let loader = Loader::new(config.data_dir.clone());
            (loader.load_all_data(), Some(loader))
        }
        SourceKind::Parquet => {
            let source = ParquetSource::new(&config.data_dir).with_repository(config.repository.clone());
            (source.load_all_data(), None)
        }
    }
}

fn view(config: &WFVConfig) -> Result<(), WFVError> {
    let (report, loader) = load(config);
    let mut model = Model::init(config, report, loader);
    let ui = TableUI::new();
    let controller = Controller::new(config);

    let mut terminal = ratatui::init();
    let result = run_loop(&mut terminal, &mut model, &ui, &controller);
    ratatui::restore();
    result
}

fn run_loop(
    terminal: &mut DefaultTerminal,
    model: &mut Model,
    ui: &TableUI,
    controller: &Controller,
) -> Result<(), WFVError> {
    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(model.get_uidata(), f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(model)?;
        model.update(message)?;
    }
    Ok(())
}

fn summary(config: &WFVConfig) -> Result<(), WFVError> {
    let (report, loader) = load(config);
    if let Some(error) = &report.index_error {
        eprintln!("{error}");
    }
    let loaded_files = report.loaded_files;
    let skipped_files = report.skipped_files;
    let malformed_files = report.malformed_files;

    let mut session = Session::new(report.records.into(), config.rows_per_page);
    if loader.is_some() {
        session.set_filter(config.repository.as_deref());
    }
    let stats = compute_stats(session.filtered_records());
    let c = compute_correlations(session.filtered_records());

    println!(
        "files:              {loaded_files} loaded, {skipped_files} skipped, {malformed_files} malformed"
    );
    println!("workflows:          {}", stats.total_count);
    println!("total findings:     {}", stats.total_findings);
    println!("avg line count:     {:.1}", stats.avg_line_count);
    println!("findings per line:  {:.4}", stats.findings_per_line);
    for (label, r) in [
        ("lines ~ findings", c.lines_findings),
        ("jobs ~ findings", c.jobs_findings),
        ("steps ~ findings", c.steps_findings),
    ] {
        println!("{label:<20}{r:>7.3}  {}", interpret_correlation(r));
    }
    Ok(())
}
