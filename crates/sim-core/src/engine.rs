//! Engine interface and the trading engine wiring strategies to managers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::candle::Candle;
use crate::config::StrategyConfig;
use crate::error::SimError;
use crate::strategy::{EmaCrossStrategy, Signal, Strategy};
use crate::trading::TradingManager;

/// Opaque consumer of candles. `process` is invoked at most once per
/// (engine, candle); an error aborts the current parameter set.
pub trait Engine {
    fn process(&mut self, candle: &Candle, historical: bool) -> Result<(), SimError>;
}

/// Drives one strategy instance and routes its signals into a trading
/// manager. One engine exists per (symbol, account) pair per parameter set.
pub struct TradingEngine {
    strategy: Box<dyn Strategy>,
    manager: Arc<Mutex<TradingManager>>,
}

impl TradingEngine {
    pub fn new(manager: Arc<Mutex<TradingManager>>, cfg: &StrategyConfig) -> Self {
        Self {
            strategy: Box::new(EmaCrossStrategy::new(cfg)),
            manager,
        }
    }
}

impl Engine for TradingEngine {
    fn process(&mut self, candle: &Candle, _historical: bool) -> Result<(), SimError> {
        let signal = self.strategy.on_candle(candle);
        let mut manager = self.manager.lock();
        manager.observe(candle);
        match signal {
            Signal::Buy => manager.enter_long(candle.close, candle.open_time),
            Signal::Sell => manager.exit_long(candle.close, candle.open_time),
            Signal::Neutral => {}
        }
        Ok(())
    }
}
