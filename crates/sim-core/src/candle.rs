//! OHLCV bar representation shared by the replay engine and the strategy layer.

/// One minute on the replay clock, in milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// A single fixed-interval OHLCV bar.
///
/// The replay engine itself only ever inspects `open_time`; the remaining
/// fields are payload for the strategy and accounting layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Open time in milliseconds since the Unix epoch, UTC.
    pub open_time: i64,
    /// Close time in milliseconds.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Minute bucket this candle's open time falls into.
    pub fn minute(&self) -> i64 {
        self.open_time.div_euclid(MINUTE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_bucket_floors_toward_negative_infinity() {
        let mut c = Candle {
            open_time: 0,
            close_time: MINUTE_MS - 1,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        assert_eq!(c.minute(), 0);
        c.open_time = MINUTE_MS;
        assert_eq!(c.minute(), 1);
        c.open_time = -1;
        assert_eq!(c.minute(), -1);
    }
}
