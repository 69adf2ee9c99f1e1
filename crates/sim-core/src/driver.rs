//! Outer simulation orchestration.
//!
//! Per parameter set: reset balances, build engines, load streams, run the
//! dispatch loop, liquidate open positions, report. The parameter stream
//! is consumed lazily and sequentially; runs share no per-run state. The
//! loader pool lives for the whole stream and store caches are cleared at
//! shutdown.

use std::collections::BTreeMap;

use tracing::{error, info};

use crate::account::AccountManager;
use crate::config::SimConfig;
use crate::engine::{Engine, TradingEngine};
use crate::error::SimError;
use crate::loader::{load_streams, plan_loads};
use crate::params::Parameters;
use crate::replay::{build_readers, run_replay};
use crate::report::{run_report, RunReport};
use crate::store::CandleStore;

pub struct SimulationDriver<'a> {
    config: SimConfig,
    store: &'a dyn CandleStore,
    accounts: Vec<AccountManager>,
}

impl<'a> SimulationDriver<'a> {
    pub fn new(config: SimConfig, store: &'a dyn CandleStore) -> Self {
        let accounts = config
            .accounts
            .iter()
            .cloned()
            .map(AccountManager::new)
            .collect();
        Self {
            config,
            store,
            accounts,
        }
    }

    pub fn accounts(&self) -> &[AccountManager] {
        &self.accounts
    }

    /// Run every parameter set in order and collect one report per
    /// completed set.
    ///
    /// An engine failure aborts its parameter set only; `EmptyReplay` and
    /// config errors abort the whole execution.
    pub fn execute(
        &mut self,
        parameters: impl IntoIterator<Item = Parameters>,
    ) -> Result<Vec<RunReport>, SimError> {
        let (start_ms, end_ms) = self.config.simulation.window_ms()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.simulation.load_threads)
            .build()
            .map_err(|e| SimError::Config(format!("cannot build loader pool: {e}")))?;

        let result = self.execute_with_pool(&pool, parameters, start_ms, end_ms);
        self.store.clear_caches();
        result
    }

    fn execute_with_pool(
        &mut self,
        pool: &rayon::ThreadPool,
        parameters: impl IntoIterator<Item = Parameters>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RunReport>, SimError> {
        let mut reports = Vec::new();
        for params in parameters {
            self.reset_accounts();

            let handlers = self.create_engines(&params);
            let plans = plan_loads(
                handlers.keys().cloned(),
                self.config.simulation.cache_candles,
                self.config.simulation.active_query_limit,
            );
            let sources = load_streams(pool, self.store, plans, start_ms, end_ms);
            let mut readers = build_readers(sources, handlers);

            let candles_processed = match run_replay(&mut readers, start_ms, end_ms) {
                Ok(n) => n,
                Err(e @ SimError::Engine(_)) => {
                    error!(parameters = %params.label(), error = %e, "aborting parameter set");
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.liquidate_open_positions();
            let report = run_report(&params, candles_processed, &self.accounts);
            info!(
                parameters = %params.label(),
                candles_processed,
                "parameter set complete",
            );
            reports.push(report);
        }
        Ok(reports)
    }

    fn reset_accounts(&mut self) {
        for account in &mut self.accounts {
            account.reset();
        }
    }

    /// Union of every account's derived symbol pairs.
    fn all_pairs(&self) -> BTreeMap<String, (String, String)> {
        let mut pairs = BTreeMap::new();
        for account in &self.accounts {
            pairs.extend(account.config().symbol_pairs());
        }
        pairs
    }

    /// Build the symbol → engines map for one parameter set: one engine
    /// per (symbol, subscribed account), only symbols with at least one
    /// engine populated. Pairs whose asset equals their fund are skipped.
    fn create_engines(&mut self, params: &Parameters) -> BTreeMap<String, Vec<Box<dyn Engine>>> {
        let strategy_cfg = params.apply_to(&self.config.strategy);
        let mut handlers: BTreeMap<String, Vec<Box<dyn Engine>>> = BTreeMap::new();

        for (symbol, (asset, fund)) in self.all_pairs() {
            if asset == fund {
                continue;
            }
            let mut engines: Vec<Box<dyn Engine>> = Vec::new();
            for account in &mut self.accounts {
                if !account.config().trades_symbol(&symbol) {
                    continue;
                }
                let manager =
                    account.new_trading_manager(&symbol, &asset, &fund, strategy_cfg.trade.clone());
                engines.push(Box::new(TradingEngine::new(manager, &strategy_cfg)));
            }
            if !engines.is_empty() {
                handlers.insert(symbol, engines);
            }
        }
        handlers
    }

    pub fn liquidate_open_positions(&self) {
        for account in &self.accounts {
            account.liquidate_open_positions();
        }
    }
}
