//! Per-symbol trading manager backed by a simulated exchange.
//!
//! A manager owns the open position for one `(symbol, account)` pair and
//! settles every fill against the account's shared balance state.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::accounting::{apply_close_fill, apply_open_fill, quantize, FeeModel};
use crate::candle::Candle;
use crate::config::TradeConfig;

// ---------------------------------------------------------------------------
// Account balance state
// ---------------------------------------------------------------------------

/// Currency balances of one account, shared by all of its trading managers.
#[derive(Debug, Default)]
pub struct AccountState {
    balances: FxHashMap<String, f64>,
}

pub type SharedAccountState = Arc<Mutex<AccountState>>;

impl AccountState {
    pub fn balance(&self, currency: &str) -> f64 {
        self.balances.get(currency).copied().unwrap_or(0.0)
    }

    pub fn credit(&mut self, currency: &str, amount: f64) {
        let entry = self.balances.entry(currency.to_string()).or_insert(0.0);
        *entry = quantize(*entry + amount);
    }

    /// Replace all balances with a single reference-currency deposit.
    pub fn reset(&mut self, reference_currency: &str, amount: f64) {
        self.balances.clear();
        self.balances.insert(reference_currency.to_string(), amount);
    }

    pub fn snapshot(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .balances
            .iter()
            .map(|(c, b)| (c.clone(), *b))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

// ---------------------------------------------------------------------------
// Simulated exchange
// ---------------------------------------------------------------------------

/// Order matching stand-in: every order fills immediately and completely at
/// the requested price, charging the flat fee model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExchange {
    pub fees: FeeModel,
}

// ---------------------------------------------------------------------------
// Positions and the trade log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    /// "OPEN_LONG", "CLOSE_LONG", or "LIQUIDATE".
    pub action: String,
    pub time_ms: i64,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub pnl: f64,
}

// ---------------------------------------------------------------------------
// Trading manager
// ---------------------------------------------------------------------------

pub struct TradingManager {
    symbol: String,
    asset: String,
    fund: String,
    exchange: SimulatedExchange,
    account: SharedAccountState,
    trade_cfg: TradeConfig,
    position: Option<Position>,
    last_close: f64,
    last_time: i64,
    trades: Vec<TradeRecord>,
}

impl TradingManager {
    pub fn new(
        symbol: &str,
        asset: &str,
        fund: &str,
        account: SharedAccountState,
        trade_cfg: TradeConfig,
    ) -> Self {
        let exchange = SimulatedExchange {
            fees: FeeModel {
                fee_bps: trade_cfg.fee_bps,
            },
        };
        Self {
            symbol: symbol.to_string(),
            asset: asset.to_string(),
            fund: fund.to_string(),
            exchange,
            account,
            trade_cfg,
            position: None,
            last_close: 0.0,
            last_time: 0,
            trades: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Track the latest close so liquidation can price the open position.
    pub fn observe(&mut self, candle: &Candle) {
        self.last_close = candle.close;
        self.last_time = candle.open_time;
    }

    /// Open a long with `allocation_pct` of the free fund balance. A second
    /// entry while a position is open, or an entry below the minimum
    /// notional, is ignored.
    pub fn enter_long(&mut self, price: f64, time_ms: i64) {
        if self.position.is_some() || price <= 0.0 {
            return;
        }
        let fee_rate = self.exchange.fees.rate();
        let mut account = self.account.lock();
        let free = account.balance(&self.fund);
        let notional = quantize(free * self.trade_cfg.allocation_pct / 100.0);
        if notional < self.trade_cfg.min_notional_usd {
            debug!(symbol = %self.symbol, notional, "entry below minimum notional, skipping");
            return;
        }
        let fill = apply_open_fill(notional, fee_rate);
        if free + fill.cash_delta < 0.0 {
            debug!(symbol = %self.symbol, "insufficient funds for entry, skipping");
            return;
        }
        let size = quantize(notional / price);
        account.credit(&self.fund, fill.cash_delta);
        account.credit(&self.asset, size);
        self.position = Some(Position {
            size,
            entry_price: price,
            entry_time: time_ms,
        });
        self.trades.push(TradeRecord {
            symbol: self.symbol.clone(),
            action: "OPEN_LONG".to_string(),
            time_ms,
            price,
            size,
            fee: fill.fee,
            pnl: 0.0,
        });
    }

    /// Close the open position at `price`. No-op when flat.
    pub fn exit_long(&mut self, price: f64, time_ms: i64) {
        self.close_position(price, time_ms, "CLOSE_LONG");
    }

    /// Close any open position at the last observed close.
    pub fn liquidate_open_position(&mut self) {
        let (price, time) = (self.last_close, self.last_time);
        self.close_position(price, time, "LIQUIDATE");
    }

    fn close_position(&mut self, price: f64, time_ms: i64, action: &str) {
        let Some(position) = self.position.take() else {
            return;
        };
        if price <= 0.0 {
            // Never saw a close for this symbol; nothing sensible to settle at.
            self.position = Some(position);
            return;
        }
        let fill = apply_close_fill(
            position.entry_price,
            price,
            position.size,
            self.exchange.fees.rate(),
        );
        let mut account = self.account.lock();
        account.credit(&self.asset, -position.size);
        account.credit(&self.fund, fill.cash_delta);
        self.trades.push(TradeRecord {
            symbol: self.symbol.clone(),
            action: action.to_string(),
            time_ms,
            price,
            size: position.size,
            fee: fill.fee,
            pnl: fill.pnl,
        });
    }

    /// Value of the open position at the last observed close.
    pub fn open_position_value(&self) -> f64 {
        self.position
            .map(|p| quantize(p.size * self.last_close))
            .unwrap_or(0.0)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn realized_pnl(&self) -> f64 {
        quantize(self.trades.iter().map(|t| t.pnl).sum())
    }

    pub fn total_fees(&self) -> f64 {
        quantize(self.trades.iter().map(|t| t.fee).sum())
    }
}
