//! History backfill: pull candles from an exchange adapter into the
//! repository, in chunks, optionally resuming after the newest stored bar.

use tracing::info;

use sim_core::candle::Candle;
use sim_core::error::SimError;

use crate::repository::CandleRepository;

/// Candles fetched per exchange request.
const BACKFILL_CHUNK: i64 = 1_000;

/// Source of historical candles, typically an exchange REST adapter.
pub trait Exchange {
    /// Every candle with `open_time` in `[from_ms, to_ms]` at the given
    /// interval, ascending.
    fn candle_history(
        &self,
        symbol: &str,
        from_ms: i64,
        to_ms: i64,
        interval_ms: i64,
    ) -> Result<Vec<Candle>, SimError>;
}

pub struct HistoryBackfill<'a> {
    repository: &'a CandleRepository,
    resume: bool,
}

impl<'a> HistoryBackfill<'a> {
    pub fn new(repository: &'a CandleRepository) -> Self {
        Self {
            repository,
            resume: true,
        }
    }

    /// When set, start after the newest stored candle instead of
    /// re-fetching the whole window. Duplicate rows are ignored either way.
    pub fn resume_backfill(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Fill `[from_ms, to_ms]` for one symbol. Returns the number of newly
    /// stored candles.
    pub fn fill_history_gaps(
        &self,
        exchange: &dyn Exchange,
        symbol: &str,
        from_ms: i64,
        to_ms: i64,
        interval_ms: i64,
    ) -> Result<usize, SimError> {
        if interval_ms <= 0 {
            return Err(SimError::Config(format!(
                "invalid backfill interval {interval_ms}ms",
            )));
        }

        let mut from = from_ms;
        if self.resume {
            if let Some(last) = self.repository.last_open_time(symbol)? {
                from = from.max(last + interval_ms);
            }
        }
        if from > to_ms {
            info!(symbol, "history already up to date");
            return Ok(0);
        }

        let chunk_span = interval_ms * BACKFILL_CHUNK;
        let mut inserted = 0;
        let mut cursor = from;
        while cursor <= to_ms {
            let chunk_end = (cursor + chunk_span - 1).min(to_ms);
            let candles = exchange.candle_history(symbol, cursor, chunk_end, interval_ms)?;
            inserted += self.repository.store_candles(symbol, &candles)?;
            cursor = chunk_end + 1;
        }

        info!(symbol, inserted, "backfill complete");
        Ok(inserted)
    }
}
