//! Strategy interface and the shipped EMA-crossover strategy.

use crate::candle::Candle;
use crate::config::StrategyConfig;
use crate::indicators::Ema;

/// Direction a strategy wants to trade after seeing a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Neutral,
}

/// Consumes one candle at a time and produces a trade signal.
///
/// Strategies keep their own private state; the engine never inspects it.
pub trait Strategy {
    fn on_candle(&mut self, candle: &Candle) -> Signal;
}

/// Fast/slow EMA crossover. Buys when the fast EMA crosses above the slow
/// one, sells on the opposite cross. Emits Neutral until both EMAs are warm.
#[derive(Debug)]
pub struct EmaCrossStrategy {
    fast: Ema,
    slow: Ema,
    prev_diff: Option<f64>,
}

impl EmaCrossStrategy {
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self {
            fast: Ema::new(cfg.ema_fast_window),
            slow: Ema::new(cfg.ema_slow_window),
            prev_diff: None,
        }
    }
}

impl Strategy for EmaCrossStrategy {
    fn on_candle(&mut self, candle: &Candle) -> Signal {
        let fast = self.fast.update(candle.close);
        let slow = self.slow.update(candle.close);
        let diff = fast - slow;

        if !self.fast.is_warm() || !self.slow.is_warm() {
            self.prev_diff = Some(diff);
            return Signal::Neutral;
        }

        let signal = match self.prev_diff {
            Some(prev) if prev <= 0.0 && diff > 0.0 => Signal::Buy,
            Some(prev) if prev >= 0.0 && diff < 0.0 => Signal::Sell,
            _ => Signal::Neutral,
        };
        self.prev_diff = Some(diff);
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::MINUTE_MS;

    fn candle(i: i64, close: f64) -> Candle {
        Candle {
            open_time: i * MINUTE_MS,
            close_time: (i + 1) * MINUTE_MS - 1,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn cfg(fast: usize, slow: usize) -> StrategyConfig {
        StrategyConfig {
            ema_fast_window: fast,
            ema_slow_window: slow,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn crossover_emits_buy_then_sell() {
        let mut s = EmaCrossStrategy::new(&cfg(2, 3));
        let prices = [10.0, 10.0, 10.0, 14.0, 16.0, 10.0, 6.0];
        let signals: Vec<Signal> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| s.on_candle(&candle(i as i64, *p)))
            .collect();

        assert!(signals.contains(&Signal::Buy));
        let buy_at = signals.iter().position(|s| *s == Signal::Buy).unwrap();
        let sell_at = signals.iter().position(|s| *s == Signal::Sell);
        assert!(sell_at.is_some());
        assert!(sell_at.unwrap() > buy_at);
    }

    #[test]
    fn warmup_region_is_neutral() {
        let mut s = EmaCrossStrategy::new(&cfg(3, 5));
        for i in 0..4 {
            assert_eq!(s.on_candle(&candle(i, 100.0 + i as f64)), Signal::Neutral);
        }
    }
}
