//! Candle store interface consumed by the stream loader.

use std::collections::BTreeSet;

use crate::candle::Candle;
use crate::error::SimError;

/// Lazy, finite, single-pass sequence of candles in non-decreasing
/// `open_time` order.
pub type CandleSource = Box<dyn Iterator<Item = Candle> + Send>;

/// Read interface of the candle repository.
///
/// `iterate` must yield every stored candle with
/// `start_ms <= open_time <= end_ms` for the symbol, ascending. When
/// `preload` is set the full range is materialized before the call returns
/// and no store-side cursor remains open afterwards.
pub trait CandleStore: Sync {
    fn iterate(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        preload: bool,
    ) -> Result<CandleSource, SimError>;

    /// Every symbol with at least one stored candle.
    fn known_symbols(&self) -> Result<BTreeSet<String>, SimError>;

    /// Drop any preloaded data held by the store.
    fn clear_caches(&self);
}
