//! Simulation configuration loaded from YAML.
//!
//! Every struct carries `#[serde(default)]` so partial files parse; the
//! defaults below are the reference values for a bare config.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::warn;

use crate::candle::MINUTE_MS;
use crate::error::SimError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    pub simulation: SimulationConfig,
    pub accounts: Vec<AccountConfig>,
    pub strategy: StrategyConfig,
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| SimError::Config(format!("invalid YAML in {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Simulation window & loading policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Inclusive simulation start, `%Y-%m-%dT%H:%M:%S`, interpreted at UTC.
    pub simulation_start: String,
    /// Inclusive simulation end.
    pub simulation_end: String,
    /// Force every symbol's stream to preload into memory.
    pub cache_candles: bool,
    /// Maximum number of simultaneously open store cursors; submissions
    /// beyond this count switch to preload.
    pub active_query_limit: usize,
    /// Worker threads for stream loading. 0 = rayon default.
    pub load_threads: usize,
    /// Candle interval of the stored data, e.g. "1m".
    pub tick_interval: String,
    pub backfill: BackfillConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation_start: "2020-01-01T00:00:00".to_string(),
            simulation_end: "2020-01-02T00:00:00".to_string(),
            cache_candles: false,
            active_query_limit: 10,
            load_threads: 0,
            tick_interval: "1m".to_string(),
            backfill: BackfillConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Simulation bounds in epoch milliseconds. Fails fast on `end < start`.
    pub fn window_ms(&self) -> Result<(i64, i64), SimError> {
        let start = parse_utc_ms(&self.simulation_start)?;
        let end = parse_utc_ms(&self.simulation_end)?;
        if end < start {
            return Err(SimError::Config(format!(
                "simulation_end {} precedes simulation_start {}",
                self.simulation_end, self.simulation_start,
            )));
        }
        Ok((start, end))
    }

    /// `tick_interval` in milliseconds.
    pub fn interval_ms(&self) -> Result<i64, SimError> {
        parse_interval_ms(&self.tick_interval)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Inclusive backfill start, same format as the simulation bounds.
    pub backfill_from: String,
    /// Inclusive backfill end.
    pub backfill_to: String,
    /// Continue from the last stored candle instead of re-fetching.
    pub resume_backfill: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            backfill_from: "2020-01-01T00:00:00".to_string(),
            backfill_to: "2020-01-02T00:00:00".to_string(),
            resume_backfill: true,
        }
    }
}

impl BackfillConfig {
    pub fn window_ms(&self) -> Result<(i64, i64), SimError> {
        let from = parse_utc_ms(&self.backfill_from)?;
        let to = parse_utc_ms(&self.backfill_to)?;
        if to < from {
            return Err(SimError::Config(format!(
                "backfill_to {} precedes backfill_from {}",
                self.backfill_to, self.backfill_from,
            )));
        }
        Ok((from, to))
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub client_id: String,
    /// Currency every holding is valued in; also the fund side of every
    /// derived symbol pair.
    pub reference_currency: String,
    /// Starting balance in the reference currency.
    pub initial_balance: f64,
    /// Symbols this account trades, e.g. "BTCUSDT".
    pub symbols: Vec<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            reference_currency: "USDT".to_string(),
            initial_balance: 10_000.0,
            symbols: Vec::new(),
        }
    }
}

impl AccountConfig {
    /// Derive `(asset, fund)` per configured symbol by stripping the
    /// reference-currency suffix. Symbols that do not trade against the
    /// reference currency are dropped with a warning.
    pub fn symbol_pairs(&self) -> BTreeMap<String, (String, String)> {
        let fund = &self.reference_currency;
        let mut pairs = BTreeMap::new();
        for symbol in &self.symbols {
            match symbol.strip_suffix(fund.as_str()) {
                Some(asset) if !asset.is_empty() => {
                    pairs.insert(symbol.clone(), (asset.to_string(), fund.clone()));
                }
                _ => warn!(%symbol, %fund, "symbol does not trade against the reference currency, skipping"),
            }
        }
        pairs
    }

    pub fn trades_symbol(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }
}

// ---------------------------------------------------------------------------
// Strategy config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub ema_fast_window: usize,
    pub ema_slow_window: usize,
    pub trade: TradeConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast_window: 12,
            ema_slow_window: 26,
            trade: TradeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    /// Percentage of the free fund balance committed per entry.
    pub allocation_pct: f64,
    pub fee_bps: f64,
    /// Entries below this notional are skipped.
    pub min_notional_usd: f64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            allocation_pct: 20.0,
            fee_bps: crate::accounting::DEFAULT_FEE_BPS,
            min_notional_usd: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse a `%Y-%m-%dT%H:%M:%S` date-time as UTC epoch milliseconds.
pub fn parse_utc_ms(raw: &str) -> Result<i64, SimError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| SimError::Config(format!("invalid date-time {raw:?}: {e}")))
}

/// Parse an interval like "1m", "15m", "1h" into milliseconds.
pub fn parse_interval_ms(raw: &str) -> Result<i64, SimError> {
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: i64 = digits
        .parse()
        .map_err(|_| SimError::Config(format!("invalid interval {raw:?}")))?;
    let unit_ms = match unit {
        "m" => MINUTE_MS,
        "h" => 60 * MINUTE_MS,
        "d" => 24 * 60 * MINUTE_MS,
        _ => return Err(SimError::Config(format!("invalid interval unit in {raw:?}"))),
    };
    Ok(n * unit_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let cfg: SimConfig = serde_yaml::from_str(
            "simulation:\n  simulation_start: 2022-01-01T00:00:00\n  simulation_end: 2022-02-01T00:00:00\naccounts:\n  - client_id: demo\n    symbols: [BTCUSDT]\n",
        )
        .unwrap();
        assert_eq!(cfg.accounts.len(), 1);
        assert_eq!(cfg.accounts[0].reference_currency, "USDT");
        assert_eq!(cfg.strategy.ema_fast_window, 12);
        assert!(!cfg.simulation.cache_candles);
    }

    #[test]
    fn window_rejects_end_before_start() {
        let sim = SimulationConfig {
            simulation_start: "2022-02-01T00:00:00".to_string(),
            simulation_end: "2022-01-01T00:00:00".to_string(),
            ..SimulationConfig::default()
        };
        assert!(matches!(sim.window_ms(), Err(SimError::Config(_))));
    }

    #[test]
    fn symbol_pairs_strip_reference_suffix() {
        let account = AccountConfig {
            symbols: vec!["BTCUSDT".to_string(), "ETHBTC".to_string(), "USDTUSDT".to_string()],
            ..AccountConfig::default()
        };
        let pairs = account.symbol_pairs();
        assert_eq!(
            pairs.get("BTCUSDT"),
            Some(&("BTC".to_string(), "USDT".to_string())),
        );
        // ETHBTC does not trade against USDT and is dropped.
        assert!(!pairs.contains_key("ETHBTC"));
        // USDTUSDT derives (USDT, USDT); the driver skips it at engine build.
        assert_eq!(
            pairs.get("USDTUSDT"),
            Some(&("USDT".to_string(), "USDT".to_string())),
        );
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_interval_ms("2h").unwrap(), 7_200_000);
        assert!(parse_interval_ms("10x").is_err());
    }
}
