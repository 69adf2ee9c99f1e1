//! Unified error type for the simulation crates.

use chrono::{TimeZone, Utc};

/// Errors surfaced by the replay engine, the candle store, and the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// The dispatch loop finished without a single candle ever entering a
    /// reader's pending slot. Fatal for the whole execution.
    EmptyReplay { start_ms: i64, end_ms: i64 },
    /// Invalid simulation configuration (bad time bounds, unparseable YAML).
    Config(String),
    /// The candle store could not produce or continue a stream.
    Store(String),
    /// Propagated from `Engine::process`; aborts the current parameter set.
    Engine(String),
}

fn format_utc(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => format!("{ms}ms"),
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyReplay { start_ms, end_ms } => write!(
                f,
                "no candles processed in simulation from {} to {}",
                format_utc(*start_ms),
                format_utc(*end_ms),
            ),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Store(msg) => write!(f, "candle store error: {msg}"),
            Self::Engine(msg) => write!(f, "engine error: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}
