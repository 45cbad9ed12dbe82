//! rollbench
//!
//! Benchmarks rolling-window metrics across thread-parallel and
//! process-parallel execution and two engine backends.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rollbench::config::{Config, OutputFormat, DEFAULT_CONFIG_FILE};
use rollbench::dataset::Dataset;
use rollbench::engine::Backend;
use rollbench::loader::{self, Loaded};
use rollbench::monitoring::MonitorScope;
use rollbench::orchestrator::{BenchmarkOrchestrator, SweepPlan, SweepReport};
use rollbench::pool::{process, ErrorPolicy, Strategy};
use rollbench::report::{self, charts};
use rollbench::utils::market_data::{self, MarketDataSpec};
use rollbench::utils::{format, Timer};
use rollbench::{init_logging, HarnessError};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rollbench")]
#[command(about = "Thread vs process benchmark for rolling-window time-series metrics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to this directory
    #[arg(long, global = true, env = "ROLLBENCH_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy x backend sweep
    Run(RunArgs),
    /// Compute the metrics table for one symbol
    Metrics(MetricsArgs),
    /// Write a synthetic market data CSV
    Generate {
        /// Output file
        #[arg(short, long, default_value = "market_data.csv")]
        output: PathBuf,

        /// Comma-separated symbols
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Rows per symbol
        #[arg(long, default_value = "10000")]
        rows: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Write a default configuration file
    Config {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Answer one work item on stdin/stdout (used by process-parallel runs)
    #[command(hide = true)]
    Worker,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Configuration file; skipped when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Input CSV; synthetic data is generated when absent
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[arg(short, long)]
    window: Option<usize>,

    /// Worker threads or processes; defaults to one per symbol
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long = "strategy", value_delimiter = ',')]
    strategies: Vec<Strategy>,

    #[arg(long = "backend", value_delimiter = ',')]
    backends: Vec<Backend>,

    #[arg(long)]
    error_policy: Option<ErrorPolicy>,

    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Resource sampling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    scope: Option<MonitorScopeArg>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Skip SVG charts
    #[arg(long)]
    no_charts: bool,

    /// Rows per symbol for generated data
    #[arg(long, default_value = "10000")]
    synthetic_rows: usize,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum MonitorScopeArg {
    Process,
    ProcessTree,
}

impl From<MonitorScopeArg> for MonitorScope {
    fn from(arg: MonitorScopeArg) -> Self {
        match arg {
            MonitorScopeArg::Process => MonitorScope::Process,
            MonitorScopeArg::ProcessTree => MonitorScope::ProcessTree,
        }
    }
}

#[derive(clap::Args)]
struct MetricsArgs {
    /// Input CSV; synthetic data is generated when absent
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[arg(short, long)]
    symbol: Option<String>,

    #[arg(short, long, default_value = "price")]
    column: String,

    #[arg(short, long, default_value = "20")]
    window: usize,

    #[arg(short, long, default_value = "streaming")]
    backend: Backend,

    /// Write the full table as CSV here instead of printing the tail
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Render the time-series chart to this SVG file
    #[arg(long)]
    chart: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.verbose, cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Metrics(args) => metrics_command(args),
        Commands::Generate {
            output,
            symbols,
            rows,
            seed,
        } => generate_command(&output, symbols, rows, seed),
        Commands::Config { output } => config_command(&output),
        Commands::Validate { config } => validate_command(&config),
        Commands::Worker => worker_command(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e
                .downcast_ref::<HarnessError>()
                .map(HarnessError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, 255) as u8)
        }
    }
}

fn run_command(args: RunArgs) -> Result<ExitCode> {
    let config = resolve_config(&args)?;
    let timer = Timer::start();

    let dataset = load_or_generate(config.data.path.as_deref(), args.synthetic_rows)?;
    let plan = SweepPlan::from_config(&config, &dataset);
    info!(
        configurations = plan.configurations.len(),
        partitions = plan.keys.len(),
        window = plan.window,
        "starting sweep"
    );

    let progress = progress_bar(plan.configurations.len() as u64);
    let orchestrator = BenchmarkOrchestrator::new(config.monitoring.monitor());
    let sweep = orchestrator.run_sweep(&dataset, &plan, |row| {
        progress.inc(1);
        progress.set_message(row.label.clone());
    });
    progress.finish_and_clear();
    let sweep = sweep?;

    report::render(&sweep.summary, config.output.format, io::stdout().lock())?;

    let dir = &config.output.directory;
    for path in report::save_summary(&sweep.summary, dir)? {
        info!(path = %path.display(), "wrote");
    }
    if config.output.charts {
        render_charts(&sweep, &plan, dir);
    }

    info!(
        elapsed = %format::duration_human(timer.elapsed()),
        failed = sweep.summary.failed_rows().count(),
        "done"
    );
    Ok(ExitCode::SUCCESS)
}

/// Defaults, then the config file if present, then environment, then flags
fn resolve_config(args: &RunArgs) -> Result<Config> {
    let mut config = if args.config.exists() {
        Config::load_from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };
    config.apply_env(|name| std::env::var(name).ok())?;

    if let Some(data) = &args.data {
        config.data.path = Some(data.clone());
    }
    if let Some(window) = args.window {
        config.sweep.window = window;
    }
    if args.workers.is_some() {
        config.sweep.workers = args.workers;
    }
    if !args.strategies.is_empty() {
        config.sweep.strategies = args.strategies.clone();
    }
    if !args.backends.is_empty() {
        config.sweep.backends = args.backends.clone();
    }
    if let Some(policy) = args.error_policy {
        config.sweep.error_policy = policy;
    }
    if !args.symbols.is_empty() {
        config.data.symbols = args.symbols.clone();
    }
    if !args.columns.is_empty() {
        config.data.columns = args.columns.clone();
    }
    if let Some(interval) = args.interval_ms {
        config.monitoring.sample_interval_ms = interval;
    }
    if let Some(scope) = args.scope {
        config.monitoring.scope = scope.into();
    }
    if let Some(dir) = &args.output_dir {
        config.output.directory = dir.clone();
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if args.no_charts {
        config.output.charts = false;
    }

    config.validate()?;
    Ok(config)
}

fn load_or_generate(path: Option<&Path>, synthetic_rows: usize) -> Result<Dataset> {
    match path {
        Some(path) => {
            let Loaded {
                dataset,
                elapsed_seconds,
                peak_memory_mb,
            } = loader::load_csv(path)?;
            info!(
                rows = dataset.len(),
                elapsed = elapsed_seconds,
                peak_memory_mb = %format::optional(peak_memory_mb, 1),
                "loaded dataset"
            );
            Ok(dataset)
        }
        None => {
            let spec = MarketDataSpec {
                rows_per_symbol: synthetic_rows,
                ..Default::default()
            };
            info!(rows_per_symbol = synthetic_rows, "no data file given, generating market data");
            Ok(market_data::generate(&spec)?)
        }
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Chart failures are logged, never fatal
fn render_charts(sweep: &SweepReport, plan: &SweepPlan, dir: &Path) {
    if let Err(e) = charts::render_comparison(&sweep.summary, dir.join(charts::COMPARISON_SVG)) {
        warn!(error = %e, "comparison chart not rendered");
    }

    let (Some(key), Some(column)) = (plan.keys.first(), plan.columns.first()) else {
        return;
    };
    let table = sweep
        .results
        .iter()
        .find_map(|(_, results)| results.result(key))
        .map(|r| &r.table);
    match table {
        Some(table) => {
            let path = dir.join(charts::timeseries_file_name(key));
            if let Err(e) = charts::render_timeseries(table, column, plan.window, &path) {
                warn!(key = %key, error = %e, "time-series chart not rendered");
            }
        }
        None => warn!(key = %key, "no completed result to chart"),
    }
}

fn metrics_command(args: MetricsArgs) -> Result<ExitCode> {
    let dataset = load_or_generate(args.data.as_deref(), 2_000)?;
    let symbol = match args.symbol {
        Some(symbol) => symbol,
        None => dataset
            .symbols()
            .into_iter()
            .next()
            .context("dataset has no symbols")?,
    };

    let engine = args.backend.engine();
    let result = engine
        .compute(&dataset, &symbol, std::slice::from_ref(&args.column), args.window)
        .with_context(|| format!("computing metrics for {}", symbol))?;
    let table = &result.table;
    info!(
        symbol = %symbol,
        rows = table.row_count(),
        elapsed = result.elapsed_seconds,
        "metrics computed"
    );

    match &args.output {
        Some(path) => write_table_csv(table, BufWriter::new(File::create(path)?))?,
        None => print_tail(table, 10)?,
    }

    if let Some(path) = &args.chart {
        charts::render_timeseries(table, &args.column, args.window, path)?;
        info!(path = %path.display(), "chart written");
    }
    Ok(ExitCode::SUCCESS)
}

fn write_table_csv<W: Write>(table: &rollbench::Table, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["timestamp"];
    header.extend(table.column_names());
    writer.write_record(&header)?;

    for (row, ts) in table.timestamps.iter().enumerate() {
        let mut record = vec![ts.format("%Y-%m-%d %H:%M:%S").to_string()];
        record.extend(
            table
                .columns
                .iter()
                .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_tail(table: &rollbench::Table, rows: usize) -> Result<()> {
    let mut out = io::stdout().lock();
    let names = table.column_names();
    write!(out, "{:<20}", "timestamp")?;
    for name in &names {
        write!(out, " {:>18}", name)?;
    }
    writeln!(out)?;

    let start = table.row_count().saturating_sub(rows);
    for row in start..table.row_count() {
        write!(out, "{:<20}", table.timestamps[row].format("%Y-%m-%d %H:%M:%S"))?;
        for column in &table.columns {
            write!(out, " {:>18}", format::optional(column.values[row], 6))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn generate_command(output: &Path, symbols: Vec<String>, rows: usize, seed: u64) -> Result<ExitCode> {
    let mut spec = MarketDataSpec {
        rows_per_symbol: rows,
        seed,
        ..Default::default()
    };
    if !symbols.is_empty() {
        spec.symbols = symbols;
    }

    let dataset = market_data::generate(&spec)?;
    loader::write_csv(&dataset, BufWriter::new(File::create(output)?))?;
    info!(path = %output.display(), rows = dataset.len(), "market data written");
    Ok(ExitCode::SUCCESS)
}

fn config_command(output: &Path) -> Result<ExitCode> {
    Config::default().save_to_file(output)?;
    info!("Generated sample configuration: {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn validate_command(path: &Path) -> Result<ExitCode> {
    info!("Validating configuration file: {}", path.display());
    let config = Config::load_from_file(path)?;
    config.validate()?;
    info!("Configuration file is valid");
    Ok(ExitCode::SUCCESS)
}

fn worker_command() -> Result<ExitCode> {
    let status = process::serve_stdio().context("worker I/O failed")?;
    Ok(ExitCode::from(status as u8))
}
