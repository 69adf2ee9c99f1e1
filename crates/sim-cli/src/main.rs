//! CLI entry point for the market-replay simulator.
//!
//! Subcommands:
//!   - `replay`   — Run one simulation over the configured window
//!   - `sweep`    — Run a sequential parameter sweep (cartesian product of axes)
//!   - `backfill` — Fill candle history gaps from CSV exchange exports

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim_core::candle::Candle;
use sim_core::config::SimConfig;
use sim_core::driver::SimulationDriver;
use sim_core::error::SimError;
use sim_core::params::{Parameters, SweepSpec};
use sim_core::report::{print_run_report, RunReport};
use sim_core::store::CandleStore;
use sim_data::{CandleRepository, Exchange, HistoryBackfill};

// ---------------------------------------------------------------------------
// CLI argument structs
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "market-replay",
    version,
    about = "Chronological multi-symbol candle replay simulator",
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single simulation
    Replay(ReplayArgs),
    /// Run a sequential parameter sweep
    Sweep(SweepArgs),
    /// Backfill candle history from CSV exports
    Backfill(BackfillArgs),
}

#[derive(Parser)]
struct ReplayArgs {
    /// Path to the simulation YAML config
    #[arg(long, default_value = "simulation.yaml")]
    config: PathBuf,

    /// Path to the SQLite candle database
    #[arg(long, default_value = "candles.db")]
    candles_db: PathBuf,

    /// Write the JSON report to this file instead of stdout only
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override a strategy value, e.g. --set strategy.ema_fast_window=9
    #[arg(long = "set", value_name = "PATH=VALUE")]
    set: Vec<String>,
}

#[derive(Parser)]
struct SweepArgs {
    /// Path to the simulation YAML config
    #[arg(long, default_value = "simulation.yaml")]
    config: PathBuf,

    /// Path to the SQLite candle database
    #[arg(long, default_value = "candles.db")]
    candles_db: PathBuf,

    /// Path to the YAML file defining sweep axes
    #[arg(long)]
    sweep_spec: PathBuf,

    /// Output file for JSONL results (one JSON object per parameter set)
    #[arg(long, default_value = "sweep_results.jsonl")]
    output: PathBuf,

    /// Only print the top N results sorted by final holdings
    #[arg(long)]
    top_n: Option<usize>,
}

#[derive(Parser)]
struct BackfillArgs {
    /// Path to the simulation YAML config
    #[arg(long, default_value = "simulation.yaml")]
    config: PathBuf,

    /// Path to the SQLite candle database
    #[arg(long, default_value = "candles.db")]
    candles_db: PathBuf,

    /// Directory of <SYMBOL>.csv exports
    #[arg(long)]
    csv_dir: PathBuf,

    /// Only backfill these symbols (default: configured plus known symbols)
    #[arg(long)]
    symbol: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Replay(args) => run_replay(args),
        Commands::Sweep(args) => run_sweep(args),
        Commands::Backfill(args) => run_backfill(args),
    };
    if let Err(e) = result {
        eprintln!("[error] {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

fn run_replay(args: ReplayArgs) -> Result<(), SimError> {
    let config = SimConfig::load(&args.config)?;
    let params = parse_overrides(&args.set)?;
    let repository = CandleRepository::open(&args.candles_db)?;

    let mut driver = SimulationDriver::new(config, &repository);
    let reports = driver.execute(vec![params])?;

    for report in &reports {
        print_run_report(report);
    }
    if let Some(path) = args.output {
        write_json(&path, &reports)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// sweep
// ---------------------------------------------------------------------------

fn run_sweep(args: SweepArgs) -> Result<(), SimError> {
    let config = SimConfig::load(&args.config)?;
    let spec = load_sweep_spec(&args.sweep_spec)?;
    let combos = spec.combinations();
    info!(combos = combos.len(), "starting parameter sweep");

    let repository = CandleRepository::open(&args.candles_db)?;
    let mut driver = SimulationDriver::new(config, &repository);
    let reports = driver.execute(combos)?;

    write_jsonl(&args.output, &reports)?;
    info!(
        path = %args.output.display(),
        results = reports.len(),
        "sweep results written",
    );

    if let Some(n) = args.top_n {
        let mut ranked: Vec<&RunReport> = reports.iter().collect();
        ranked.sort_by(|a, b| {
            best_holdings(b)
                .partial_cmp(&best_holdings(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for report in ranked.into_iter().take(n) {
            print_run_report(report);
        }
    }
    Ok(())
}

fn load_sweep_spec(path: &Path) -> Result<SweepSpec, SimError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SimError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| SimError::Config(format!("invalid sweep spec {}: {e}", path.display())))
}

fn best_holdings(report: &RunReport) -> f64 {
    report
        .accounts
        .iter()
        .map(|a| a.holdings)
        .fold(f64::MIN, f64::max)
}

// ---------------------------------------------------------------------------
// backfill
// ---------------------------------------------------------------------------

fn run_backfill(args: BackfillArgs) -> Result<(), SimError> {
    let config = SimConfig::load(&args.config)?;
    let (from_ms, to_ms) = config.simulation.backfill.window_ms()?;
    let interval_ms = config.simulation.interval_ms()?;
    let repository = CandleRepository::open(&args.candles_db)?;

    let symbols: Vec<String> = if args.symbol.is_empty() {
        let mut all: std::collections::BTreeSet<String> = config
            .accounts
            .iter()
            .flat_map(|a| a.symbols.iter().cloned())
            .collect();
        all.extend(repository.known_symbols()?);
        all.into_iter().collect()
    } else {
        args.symbol
    };

    let exchange = CsvExchange {
        dir: args.csv_dir,
    };
    let backfill =
        HistoryBackfill::new(&repository).resume_backfill(config.simulation.backfill.resume_backfill);

    for symbol in &symbols {
        match backfill.fill_history_gaps(&exchange, symbol, from_ms, to_ms, interval_ms) {
            Ok(inserted) => info!(%symbol, inserted, "symbol backfilled"),
            Err(e) => warn!(%symbol, error = %e, "backfill failed, skipping symbol"),
        }
    }
    Ok(())
}

/// Exchange adapter over a directory of CSV exports, one `<SYMBOL>.csv`
/// per symbol with `open_time,close_time,open,high,low,close,volume` rows.
struct CsvExchange {
    dir: PathBuf,
}

impl Exchange for CsvExchange {
    fn candle_history(
        &self,
        symbol: &str,
        from_ms: i64,
        to_ms: i64,
        _interval_ms: i64,
    ) -> Result<Vec<Candle>, SimError> {
        let path = self.dir.join(format!("{symbol}.csv"));
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| SimError::Store(format!("cannot read {}: {e}", path.display())))?;

        let mut out = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if lineno == 0 && line.starts_with("open_time") {
                continue;
            }
            let candle = parse_csv_candle(line).map_err(|e| {
                SimError::Store(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            if candle.open_time >= from_ms && candle.open_time <= to_ms {
                out.push(candle);
            }
        }
        out.sort_by_key(|c| c.open_time);
        Ok(out)
    }
}

fn parse_csv_candle(line: &str) -> Result<Candle, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 7 {
        return Err(format!("expected 7 fields, got {}", fields.len()));
    }
    let int = |i: usize| {
        fields[i]
            .parse::<i64>()
            .map_err(|e| format!("field {}: {e}", i + 1))
    };
    let num = |i: usize| {
        fields[i]
            .parse::<f64>()
            .map_err(|e| format!("field {}: {e}", i + 1))
    };
    Ok(Candle {
        open_time: int(0)?,
        close_time: int(1)?,
        open: num(2)?,
        high: num(3)?,
        low: num(4)?,
        close: num(5)?,
        volume: num(6)?,
    })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn parse_overrides(sets: &[String]) -> Result<Parameters, SimError> {
    let mut overrides = Vec::new();
    for set in sets {
        let (path, value) = set
            .split_once('=')
            .ok_or_else(|| SimError::Config(format!("--set expects PATH=VALUE, got {set:?}")))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| SimError::Config(format!("--set value in {set:?} is not a number")))?;
        overrides.push((path.trim().to_string(), value));
    }
    Ok(Parameters { overrides })
}

fn write_json(path: &Path, reports: &[RunReport]) -> Result<(), SimError> {
    let json = serde_json::to_string_pretty(reports)
        .map_err(|e| SimError::Config(format!("cannot serialize report: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| SimError::Config(format!("cannot write {}: {e}", path.display())))
}

fn write_jsonl(path: &Path, reports: &[RunReport]) -> Result<(), SimError> {
    let mut file = std::fs::File::create(path)
        .map_err(|e| SimError::Config(format!("cannot create {}: {e}", path.display())))?;
    for report in reports {
        let line = serde_json::to_string(report)
            .map_err(|e| SimError::Config(format!("cannot serialize report: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| SimError::Config(format!("cannot write {}: {e}", path.display())))?;
    }
    Ok(())
}
