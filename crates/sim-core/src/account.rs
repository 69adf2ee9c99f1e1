//! Account manager: balances, trading-manager registry, liquidation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::accounting::quantize;
use crate::config::{AccountConfig, TradeConfig};
use crate::trading::{AccountState, SharedAccountState, TradingManager};

/// One simulated client account. Owns the shared balance state and every
/// trading manager created for the current parameter set.
pub struct AccountManager {
    config: AccountConfig,
    state: SharedAccountState,
    managers: Vec<Arc<Mutex<TradingManager>>>,
}

impl AccountManager {
    pub fn new(config: AccountConfig) -> Self {
        let state: SharedAccountState = Arc::new(Mutex::new(AccountState::default()));
        state
            .lock()
            .reset(&config.reference_currency, config.initial_balance);
        Self {
            config,
            state,
            managers: Vec::new(),
        }
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn reference_currency(&self) -> &str {
        &self.config.reference_currency
    }

    /// Restore the initial balance and drop the previous run's managers.
    pub fn reset(&mut self) {
        self.managers.clear();
        self.state
            .lock()
            .reset(&self.config.reference_currency, self.config.initial_balance);
    }

    /// Create and register a trading manager for one symbol pair.
    pub fn new_trading_manager(
        &mut self,
        symbol: &str,
        asset: &str,
        fund: &str,
        trade_cfg: TradeConfig,
    ) -> Arc<Mutex<TradingManager>> {
        let manager = Arc::new(Mutex::new(TradingManager::new(
            symbol,
            asset,
            fund,
            Arc::clone(&self.state),
            trade_cfg,
        )));
        self.managers.push(Arc::clone(&manager));
        manager
    }

    pub fn all_trading_managers(&self) -> &[Arc<Mutex<TradingManager>>] {
        &self.managers
    }

    pub fn liquidate_open_positions(&self) {
        for manager in &self.managers {
            manager.lock().liquidate_open_position();
        }
    }

    /// Reference-currency cash plus every open position marked at its
    /// manager's last observed close.
    pub fn total_funds_in_reference_currency(&self) -> f64 {
        let cash = self.state.lock().balance(&self.config.reference_currency);
        let positions: f64 = self
            .managers
            .iter()
            .map(|m| m.lock().open_position_value())
            .sum();
        quantize(cash + positions)
    }

    pub fn balances(&self) -> Vec<(String, f64)> {
        self.state.lock().snapshot()
    }
}
