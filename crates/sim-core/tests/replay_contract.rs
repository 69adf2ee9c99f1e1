//! End-to-end contract tests for the dispatch loop, the stream loader, and
//! the simulation driver.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use sim_core::candle::{Candle, MINUTE_MS};
use sim_core::config::{AccountConfig, SimConfig, SimulationConfig};
use sim_core::driver::SimulationDriver;
use sim_core::engine::Engine;
use sim_core::error::SimError;
use sim_core::loader::{load_streams, plan_loads};
use sim_core::params::Parameters;
use sim_core::replay::{run_replay, MarketReader};
use sim_core::store::{CandleSource, CandleStore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn candle(open_time: i64) -> Candle {
    Candle {
        open_time,
        close_time: open_time + MINUTE_MS - 1,
        open: 100.0,
        high: 100.0,
        low: 100.0,
        close: 100.0,
        volume: 1.0,
    }
}

fn priced(open_time: i64, close: f64) -> Candle {
    Candle {
        close,
        open: close,
        high: close,
        low: close,
        ..candle(open_time)
    }
}

type DispatchLog = Arc<Mutex<Vec<(String, i64)>>>;

/// Records every dispatch as (tag, open_time).
struct RecordingEngine {
    tag: String,
    log: DispatchLog,
}

impl Engine for RecordingEngine {
    fn process(&mut self, candle: &Candle, historical: bool) -> Result<(), SimError> {
        assert!(!historical);
        self.log.lock().push((self.tag.clone(), candle.open_time));
        Ok(())
    }
}

struct FailingEngine;

impl Engine for FailingEngine {
    fn process(&mut self, _candle: &Candle, _historical: bool) -> Result<(), SimError> {
        Err(SimError::Engine("strategy blew up".to_string()))
    }
}

fn reader(symbol: &str, times: &[i64], log: &DispatchLog) -> MarketReader {
    let candles: Vec<Candle> = times.iter().map(|t| candle(*t)).collect();
    MarketReader {
        symbol: symbol.to_string(),
        input: Box::new(candles.into_iter()),
        pending: None,
        engines: vec![Box::new(RecordingEngine {
            tag: symbol.to_string(),
            log: Arc::clone(log),
        })],
    }
}

fn dispatches(log: &DispatchLog) -> Vec<(String, i64)> {
    log.lock().clone()
}

/// In-memory candle store that records how each stream was requested.
struct StubStore {
    data: BTreeMap<String, Vec<Candle>>,
    fail: BTreeSet<String>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl StubStore {
    fn new(data: BTreeMap<String, Vec<Candle>>) -> Self {
        Self {
            data,
            fail: BTreeSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, symbol: &str) -> Self {
        self.fail.insert(symbol.to_string());
        self
    }
}

impl CandleStore for StubStore {
    fn iterate(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        preload: bool,
    ) -> Result<CandleSource, SimError> {
        self.calls.lock().push((symbol.to_string(), preload));
        if self.fail.contains(symbol) {
            return Err(SimError::Store(format!("query failed for {symbol}")));
        }
        let candles: Vec<Candle> = self
            .data
            .get(symbol)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|c| c.open_time >= start_ms && c.open_time <= end_ms)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(candles.into_iter()))
    }

    fn known_symbols(&self) -> Result<BTreeSet<String>, SimError> {
        Ok(self.data.keys().cloned().collect())
    }

    fn clear_caches(&self) {}
}

fn load_pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
}

// ---------------------------------------------------------------------------
// Dispatch loop scenarios
// ---------------------------------------------------------------------------

#[test]
fn two_symbols_interleave_chronologically() {
    let log: DispatchLog = Arc::default();
    let mut readers = vec![
        reader("A", &[0, 120_000], &log),
        reader("B", &[60_000, 180_000], &log),
    ];

    let processed = run_replay(&mut readers, 0, 240_000).unwrap();
    assert!(processed >= 1);
    assert_eq!(
        dispatches(&log),
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 60_000),
            ("A".to_string(), 120_000),
            ("B".to_string(), 180_000),
        ],
    );
}

#[test]
fn same_minute_candles_dispatch_in_symbol_order() {
    let log: DispatchLog = Arc::default();
    let mut readers = vec![reader("A", &[0, 30], &log), reader("B", &[45], &log)];

    run_replay(&mut readers, 0, 60_000).unwrap();
    assert_eq!(
        dispatches(&log),
        vec![
            ("A".to_string(), 0),
            ("A".to_string(), 30),
            ("B".to_string(), 45),
        ],
    );
}

#[test]
fn empty_replay_is_a_fatal_error() {
    let log: DispatchLog = Arc::default();
    let mut readers = vec![reader("A", &[], &log), reader("B", &[], &log)];

    let err = run_replay(&mut readers, 0, 86_400_000).unwrap_err();
    assert_eq!(
        err,
        SimError::EmptyReplay {
            start_ms: 0,
            end_ms: 86_400_000,
        },
    );
    assert_eq!(
        err.to_string(),
        "no candles processed in simulation from 1970-01-01T00:00:00 to 1970-01-02T00:00:00",
    );
    assert!(dispatches(&log).is_empty());
}

#[test]
fn candles_past_the_end_are_dropped_silently() {
    let log: DispatchLog = Arc::default();
    let mut readers = vec![reader("A", &[0, 60_000, 120_000], &log)];

    run_replay(&mut readers, 0, 60_000).unwrap();
    assert_eq!(
        dispatches(&log),
        vec![("A".to_string(), 0), ("A".to_string(), 60_000)],
    );
}

#[test]
fn lower_edge_tolerance_admits_start_minus_one() {
    let start = 600_000;
    let log: DispatchLog = Arc::default();
    let mut readers = vec![reader("A", &[start - 1], &log)];

    run_replay(&mut readers, start, start + 5 * MINUTE_MS).unwrap();
    assert_eq!(dispatches(&log), vec![("A".to_string(), start - 1)]);
}

#[test]
fn final_window_reaches_end_plus_minute_minus_one() {
    let end = 300_000;
    let log: DispatchLog = Arc::default();
    let mut readers = vec![reader("A", &[end + MINUTE_MS - 1], &log)];

    run_replay(&mut readers, 0, end).unwrap();
    assert_eq!(
        dispatches(&log),
        vec![("A".to_string(), end + MINUTE_MS - 1)],
    );
}

#[test]
fn subscription_order_is_preserved_within_a_symbol() {
    let log: DispatchLog = Arc::default();
    let engines: Vec<Box<dyn Engine>> = vec![
        Box::new(RecordingEngine {
            tag: "first".to_string(),
            log: Arc::clone(&log),
        }),
        Box::new(RecordingEngine {
            tag: "second".to_string(),
            log: Arc::clone(&log),
        }),
    ];
    let mut readers = vec![MarketReader {
        symbol: "A".to_string(),
        input: Box::new(vec![candle(0)].into_iter()),
        pending: None,
        engines,
    }];

    run_replay(&mut readers, 0, 60_000).unwrap();
    assert_eq!(
        dispatches(&log),
        vec![("first".to_string(), 0), ("second".to_string(), 0)],
    );
}

#[test]
fn replay_is_deterministic_across_runs() {
    let run = || {
        let log: DispatchLog = Arc::default();
        let mut readers = vec![
            reader("A", &[0, 30, 90_000, 119_999], &log),
            reader("B", &[59_999, 60_000, 180_000], &log),
            reader("C", &[45, 240_000], &log),
        ];
        run_replay(&mut readers, 0, 240_000).unwrap();
        dispatches(&log)
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);

    // Minute buckets never decrease across the emission order.
    let minutes: Vec<i64> = first.iter().map(|(_, t)| t / MINUTE_MS).collect();
    let mut sorted = minutes.clone();
    sorted.sort();
    assert_eq!(minutes, sorted);
}

#[test]
fn engine_failure_propagates_out_of_the_loop() {
    let mut readers = vec![MarketReader {
        symbol: "A".to_string(),
        input: Box::new(vec![candle(0)].into_iter()),
        pending: None,
        engines: vec![Box::new(FailingEngine)],
    }];

    let err = run_replay(&mut readers, 0, 60_000).unwrap_err();
    assert!(matches!(err, SimError::Engine(_)));
}

// ---------------------------------------------------------------------------
// Stream loader scenarios
// ---------------------------------------------------------------------------

#[test]
fn preload_threshold_splits_lazy_and_eager_loads() {
    let mut data = BTreeMap::new();
    for i in 0..5 {
        data.insert(format!("S{i}USDT"), vec![candle(i * MINUTE_MS)]);
    }
    let store = StubStore::new(data);

    let plans = plan_loads(store.data.keys().cloned(), false, 2);
    let sources = load_streams(&load_pool(), &store, plans, 0, 600_000);
    assert_eq!(sources.len(), 5);

    let mut calls = store.calls.lock().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            ("S0USDT".to_string(), false),
            ("S1USDT".to_string(), false),
            ("S2USDT".to_string(), true),
            ("S3USDT".to_string(), true),
            ("S4USDT".to_string(), true),
        ],
    );

    // All five candles still dispatch.
    let log: DispatchLog = Arc::default();
    let mut readers: Vec<MarketReader> = sources
        .into_iter()
        .map(|(symbol, input)| MarketReader {
            engines: vec![Box::new(RecordingEngine {
                tag: symbol.clone(),
                log: Arc::clone(&log),
            })],
            symbol,
            input,
            pending: None,
        })
        .collect();
    run_replay(&mut readers, 0, 600_000).unwrap();
    assert_eq!(dispatches(&log).len(), 5);
}

#[test]
fn failed_symbol_is_dropped_and_the_rest_proceed() {
    let mut data = BTreeMap::new();
    data.insert("XUSDT".to_string(), vec![candle(0)]);
    data.insert("YUSDT".to_string(), vec![candle(0), candle(60_000)]);
    let store = StubStore::new(data).failing("XUSDT");

    let plans = plan_loads(
        ["XUSDT".to_string(), "YUSDT".to_string()],
        false,
        10,
    );
    let sources = load_streams(&load_pool(), &store, plans, 0, 600_000);
    assert_eq!(sources.len(), 1);
    assert!(sources.contains_key("YUSDT"));

    let log: DispatchLog = Arc::default();
    let mut readers: Vec<MarketReader> = sources
        .into_iter()
        .map(|(symbol, input)| MarketReader {
            engines: vec![Box::new(RecordingEngine {
                tag: symbol.clone(),
                log: Arc::clone(&log),
            })],
            symbol,
            input,
            pending: None,
        })
        .collect();
    run_replay(&mut readers, 0, 600_000).unwrap();
    assert_eq!(
        dispatches(&log),
        vec![("YUSDT".to_string(), 0), ("YUSDT".to_string(), 60_000)],
    );
}

// ---------------------------------------------------------------------------
// Driver scenarios
// ---------------------------------------------------------------------------

fn driver_config(symbols: Vec<String>) -> SimConfig {
    SimConfig {
        simulation: SimulationConfig {
            simulation_start: "1970-01-01T00:00:00".to_string(),
            simulation_end: "1970-01-01T01:00:00".to_string(),
            ..SimulationConfig::default()
        },
        accounts: vec![AccountConfig {
            client_id: "demo".to_string(),
            reference_currency: "USDT".to_string(),
            initial_balance: 10_000.0,
            symbols,
        }],
        ..SimConfig::default()
    }
}

/// Price path with a buy cross followed by a sell cross for small EMA
/// windows.
fn trending_candles() -> Vec<Candle> {
    let prices = [100.0, 100.0, 100.0, 100.0, 140.0, 160.0, 180.0, 120.0, 80.0, 60.0];
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| priced(i as i64 * MINUTE_MS, *p))
        .collect()
}

#[test]
fn driver_runs_a_full_parameter_set() {
    let mut data = BTreeMap::new();
    data.insert("BTCUSDT".to_string(), trending_candles());
    let store = StubStore::new(data);

    let mut driver = SimulationDriver::new(driver_config(vec!["BTCUSDT".to_string()]), &store);
    let params = Parameters {
        overrides: vec![
            ("strategy.ema_fast_window".to_string(), 2.0),
            ("strategy.ema_slow_window".to_string(), 3.0),
        ],
    };
    let reports = driver.execute(vec![params]).unwrap();

    assert_eq!(reports.len(), 1);
    let account = &reports[0].accounts[0];
    assert_eq!(account.client_id, "demo");
    assert!(account.trades >= 2, "expected an entry and an exit");
    assert!(account.holdings > 0.0);
    // Everything ended in the reference currency after liquidation.
    let btc = account
        .balances
        .iter()
        .find(|(c, _)| c == "BTC")
        .map(|(_, b)| *b)
        .unwrap_or(0.0);
    assert_eq!(btc, 0.0);
}

#[test]
fn driver_runs_are_independent_and_identical() {
    let mut data = BTreeMap::new();
    data.insert("BTCUSDT".to_string(), trending_candles());
    data.insert("ETHUSDT".to_string(), trending_candles());
    let store = StubStore::new(data);

    let mut driver = SimulationDriver::new(
        driver_config(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]),
        &store,
    );
    let params = || Parameters {
        overrides: vec![
            ("strategy.ema_fast_window".to_string(), 2.0),
            ("strategy.ema_slow_window".to_string(), 3.0),
        ],
    };
    let reports = driver.execute(vec![params(), params()]).unwrap();

    assert_eq!(reports.len(), 2);
    let first = serde_json::to_string(&reports[0]).unwrap();
    let second = serde_json::to_string(&reports[1]).unwrap();
    assert_eq!(first, second);
}

#[test]
fn driver_fails_fast_on_inverted_bounds() {
    let store = StubStore::new(BTreeMap::new());
    let mut config = driver_config(vec!["BTCUSDT".to_string()]);
    config.simulation.simulation_start = "1970-01-02T00:00:00".to_string();
    config.simulation.simulation_end = "1970-01-01T00:00:00".to_string();

    let mut driver = SimulationDriver::new(config, &store);
    let err = driver.execute(vec![Parameters::none()]).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
}

#[test]
fn driver_surfaces_empty_replay() {
    let mut data = BTreeMap::new();
    data.insert("BTCUSDT".to_string(), Vec::new());
    let store = StubStore::new(data);

    let mut driver = SimulationDriver::new(driver_config(vec!["BTCUSDT".to_string()]), &store);
    let err = driver.execute(vec![Parameters::none()]).unwrap_err();
    assert!(matches!(err, SimError::EmptyReplay { .. }));
}
