//! Multi-stream chronological dispatch loop.
//!
//! One `MarketReader` per symbol buffers at most one candle; a virtual
//! clock walks the simulation window in one-minute steps and every reader
//! whose buffered candle falls inside the current window dispatches it to
//! the symbol's engines. This avoids a global priority queue over candles:
//! no upfront buffering beyond one candle per symbol, at the cost of the
//! retry-window rule below.

use std::collections::BTreeMap;

use tracing::debug;

use crate::candle::{Candle, MINUTE_MS};
use crate::engine::Engine;
use crate::error::SimError;
use crate::store::CandleSource;

// ---------------------------------------------------------------------------
// Market reader
// ---------------------------------------------------------------------------

/// Per-symbol cursor: the symbol's candle stream, its single buffered
/// candle, and the engines subscribed to the symbol.
pub struct MarketReader {
    pub symbol: String,
    pub input: CandleSource,
    pub pending: Option<Candle>,
    pub engines: Vec<Box<dyn Engine>>,
}

/// Join loaded streams with their engines, in lexicographic symbol order.
///
/// The ordering is a correctness-affecting tie-break: within one minute
/// window the earlier symbol dispatches first. Symbols whose stream failed
/// to load are absent from `sources` and their engines are dropped here.
pub fn build_readers(
    sources: BTreeMap<String, CandleSource>,
    mut handlers: BTreeMap<String, Vec<Box<dyn Engine>>>,
) -> Vec<MarketReader> {
    let mut readers = Vec::with_capacity(sources.len());
    for (symbol, input) in sources {
        let Some(engines) = handlers.remove(&symbol) else {
            continue;
        };
        readers.push(MarketReader {
            symbol,
            input,
            pending: None,
            engines,
        });
    }
    readers
}

// ---------------------------------------------------------------------------
// Replay clock
// ---------------------------------------------------------------------------

/// Virtual time cursor advancing in one-minute steps over
/// `start_ms..=end_ms`.
///
/// Rewinding is expressed as a retry-window flag rather than literal clock
/// arithmetic: `retry_window()` makes the next `advance()` a no-op, so the
/// same window is scanned again. Each retry is paired with the consumption
/// of at least one fresh candle, which bounds the total pass count by
/// `(end - start) / MINUTE_MS + total_candles`.
#[derive(Debug)]
pub struct ReplayClock {
    clock: i64,
    end_ms: i64,
    retry: bool,
}

impl ReplayClock {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self {
            clock: start_ms,
            end_ms,
            retry: false,
        }
    }

    pub fn running(&self) -> bool {
        self.clock <= self.end_ms
    }

    pub fn now_ms(&self) -> i64 {
        self.clock
    }

    /// Whether `open_time` falls inside the current minute window.
    ///
    /// The lower bound carries a one-millisecond tolerance, admitting
    /// candles whose open time is `clock - 1`.
    pub fn in_window(&self, open_time: i64) -> bool {
        open_time + 1 >= self.clock && open_time <= self.clock + MINUTE_MS - 1
    }

    /// Scan the current window once more before moving on.
    pub fn retry_window(&mut self) {
        self.retry = true;
    }

    pub fn advance(&mut self) {
        if std::mem::take(&mut self.retry) {
            return;
        }
        self.clock += MINUTE_MS;
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

/// Replay every reader's stream through its engines in global time order.
///
/// Per pass, each reader drains every buffered candle that falls inside
/// the current window before the scan moves to the next reader; within a
/// window, dispatches therefore happen in (sorted-symbol,
/// subscription-index) order. A candle pulled into an empty pending slot
/// is never dispatched in the pass that pulled it — when it already
/// belongs to the current window, the retry flag makes the next pass
/// revisit the window instead of stepping past the candle.
///
/// Returns the number of candles pulled into empty pending slots, or
/// `EmptyReplay` when that count is zero after the clock runs out. Candles
/// past `end_ms + MINUTE_MS - 1` are dropped silently with the rest of
/// their stream.
pub fn run_replay(
    readers: &mut [MarketReader],
    start_ms: i64,
    end_ms: i64,
) -> Result<u64, SimError> {
    let mut clock = ReplayClock::new(start_ms, end_ms);
    let mut candles_processed: u64 = 0;

    while clock.running() {
        for reader in readers.iter_mut() {
            loop {
                match reader.pending.take() {
                    Some(candle) if clock.in_window(candle.open_time) => {
                        for engine in reader.engines.iter_mut() {
                            engine.process(&candle, false)?;
                        }
                        match reader.input.next() {
                            Some(next) => {
                                if clock.in_window(next.open_time) {
                                    clock.retry_window();
                                }
                                // Keep draining: the refill may belong to
                                // this same window.
                                reader.pending = Some(next);
                            }
                            None => break,
                        }
                    }
                    Some(candle) => {
                        // Out of window: keep it buffered, do not advance
                        // this reader.
                        reader.pending = Some(candle);
                        break;
                    }
                    None => {
                        if let Some(next) = reader.input.next() {
                            candles_processed += 1;
                            if clock.in_window(next.open_time) {
                                clock.retry_window();
                            }
                            reader.pending = Some(next);
                        }
                        break;
                    }
                }
            }
        }
        clock.advance();
    }

    debug!(candles_processed, "dispatch loop finished");
    if candles_processed == 0 {
        return Err(SimError::EmptyReplay { start_ms, end_ms });
    }
    Ok(candles_processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_one_ms_below_the_lower_edge() {
        let clock = ReplayClock::new(60_000, 120_000);
        assert!(clock.in_window(59_999));
        assert!(!clock.in_window(59_998));
        assert!(clock.in_window(60_000));
        assert!(clock.in_window(119_999));
        assert!(!clock.in_window(120_000));
    }

    #[test]
    fn retry_makes_the_next_advance_a_no_op() {
        let mut clock = ReplayClock::new(0, 300_000);
        clock.advance();
        assert_eq!(clock.now_ms(), 60_000);
        clock.retry_window();
        clock.advance();
        assert_eq!(clock.now_ms(), 60_000);
        clock.advance();
        assert_eq!(clock.now_ms(), 120_000);
    }

    #[test]
    fn clock_stops_after_the_end_bound() {
        let mut clock = ReplayClock::new(0, 60_000);
        assert!(clock.running());
        clock.advance();
        assert!(clock.running());
        clock.advance();
        assert!(!clock.running());
    }
}
