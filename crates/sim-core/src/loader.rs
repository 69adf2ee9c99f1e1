//! Stream loader: fans per-symbol candle loads out over a worker pool.
//!
//! The preload decision is made sequentially at submission time so it is
//! deterministic; only the loads themselves run in parallel.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::warn;

use crate::store::{CandleSource, CandleStore};

/// One planned load: which symbol, and whether the store should
/// materialize the full range up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub symbol: String,
    pub preload: bool,
}

/// Decide the preload flag per symbol, in submission order.
///
/// A symbol preloads when `cache_all` is set or when its submission pushes
/// the running query count past `active_query_limit` — beyond that limit,
/// remaining symbols pay the preload cost so they hold no store cursor.
pub fn plan_loads(
    symbols: impl IntoIterator<Item = String>,
    cache_all: bool,
    active_query_limit: usize,
) -> Vec<LoadPlan> {
    let mut active_queries = 0usize;
    symbols
        .into_iter()
        .map(|symbol| {
            active_queries += 1;
            LoadPlan {
                symbol,
                preload: cache_all || active_queries > active_query_limit,
            }
        })
        .collect()
}

/// Execute a load plan against the store on `pool`, blocking until every
/// load finishes. A failed symbol is logged and omitted; the remaining
/// symbols proceed.
pub fn load_streams(
    pool: &rayon::ThreadPool,
    store: &dyn CandleStore,
    plans: Vec<LoadPlan>,
    start_ms: i64,
    end_ms: i64,
) -> BTreeMap<String, CandleSource> {
    let results: Vec<(String, Result<CandleSource, crate::error::SimError>)> = pool.install(|| {
        plans
            .into_par_iter()
            .map(|plan| {
                let source = store.iterate(&plan.symbol, start_ms, end_ms, plan.preload);
                (plan.symbol, source)
            })
            .collect()
    });

    let mut sources = BTreeMap::new();
    for (symbol, result) in results {
        match result {
            Ok(source) => {
                sources.insert(symbol, source);
            }
            Err(e) => warn!(%symbol, error = %e, "error querying candles, dropping symbol"),
        }
    }
    sources
}
