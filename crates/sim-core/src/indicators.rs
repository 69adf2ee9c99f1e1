//! Incremental indicators fed one bar at a time by the strategy layer.

/// Exponential Moving Average — incremental computation.
///
/// Behaviour:
///   bar 0  → value = price (first observation)
///   bar 1+ → value = α·price + (1−α)·prev   where α = 2/(window+1)
///
/// `is_warm()` returns true once `window` bars have been seen, so callers
/// can skip the warmup region.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    pub value: f64,
    window: usize,
    count: usize,
}

impl Ema {
    pub fn new(window: usize) -> Self {
        Self {
            alpha: 2.0 / (window as f64 + 1.0),
            value: 0.0,
            window,
            count: 0,
        }
    }

    /// Feed one price, return the current EMA value.
    pub fn update(&mut self, price: f64) -> f64 {
        if self.count == 0 {
            self.value = price;
        } else {
            self.value = self.alpha * price + (1.0 - self.alpha) * self.value;
        }
        self.count += 1;
        self.value
    }

    pub fn is_warm(&self) -> bool {
        self.count >= self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_with_first_observation() {
        // alpha = 2/(3+1) = 0.5
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(10.0), 10.0);
        assert_eq!(ema.update(11.0), 10.5);
        assert_eq!(ema.update(12.0), 11.25);
        assert_eq!(ema.update(13.0), 12.125);
    }

    #[test]
    fn ema_warms_after_window_bars() {
        let mut ema = Ema::new(2);
        assert!(!ema.is_warm());
        ema.update(1.0);
        assert!(!ema.is_warm());
        ema.update(1.0);
        assert!(ema.is_warm());
    }
}
