use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// One OHLC price observation, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    timestamp: DateTime<Utc>,
}

impl Candle {
    /// Returns the open price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Returns the high price.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Returns the low price.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Returns the close price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Returns the open time of the candle.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns `true` if `price` was traded during the candle (`low <= price <= high`).
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

/// Builder for [`Candle`], validating prices on `build`.
#[derive(Debug, Default)]
pub struct CandleBuilder {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl CandleBuilder {
    /// Starts a new builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the open price.
    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    /// Sets the high price.
    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    /// Sets the low price.
    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    /// Sets the close price.
    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// Sets the open time.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the candle.
    ///
    /// Fails if a field is missing, a price is not finite and positive, or `low <= open, close <= high`
    /// does not hold.
    pub fn build(self) -> Result<Candle> {
        let open = self.open.ok_or(Error::MissingField("open"))?;
        let high = self.high.ok_or(Error::MissingField("high"))?;
        let low = self.low.ok_or(Error::MissingField("low"))?;
        let close = self.close.ok_or(Error::MissingField("close"))?;
        let timestamp = self.timestamp.ok_or(Error::MissingField("timestamp"))?;

        let positive = [open, high, low, close].iter().all(|p| p.is_finite() && *p > 0.0);
        if !positive || low > open || low > close || open > high || close > high {
            return Err(Error::InvalidCandle { open, high, low, close });
        }

        Ok(Candle {
            open,
            high,
            low,
            close,
            timestamp,
        })
    }
}

#[cfg(test)]
fn candle(open: f64, high: f64, low: f64, close: f64) -> Result<Candle> {
    CandleBuilder::builder()
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .timestamp(DateTime::default())
        .build()
}

#[cfg(test)]
#[test]
fn build_valid_candle() {
    let c = candle(100.0, 110.0, 95.0, 105.0).unwrap();
    assert_eq!(c.open(), 100.0);
    assert_eq!(c.high(), 110.0);
    assert_eq!(c.low(), 95.0);
    assert_eq!(c.close(), 105.0);
    assert_eq!(c.timestamp(), DateTime::<Utc>::default());
}

#[cfg(test)]
#[test]
fn build_rejects_broken_range() {
    assert!(matches!(candle(100.0, 99.0, 95.0, 98.0), Err(Error::InvalidCandle { .. })));
    assert!(matches!(candle(100.0, 110.0, 101.0, 105.0), Err(Error::InvalidCandle { .. })));
    assert!(matches!(candle(100.0, 110.0, 95.0, 111.0), Err(Error::InvalidCandle { .. })));
    assert!(matches!(candle(f64::NAN, 110.0, 95.0, 100.0), Err(Error::InvalidCandle { .. })));
}

#[cfg(test)]
#[test]
fn build_rejects_non_positive_prices() {
    assert!(matches!(candle(0.0, 1.0, 0.0, 0.5), Err(Error::InvalidCandle { .. })));
    assert!(matches!(candle(1.0, 2.0, -0.5, 1.5), Err(Error::InvalidCandle { .. })));
    assert!(candle(0.5, 2.0, 0.5, 1.5).is_ok());
}

#[cfg(test)]
#[test]
fn build_missing_field() {
    let result = CandleBuilder::builder().open(1.0).high(1.0).low(1.0).close(1.0).build();
    assert!(matches!(result, Err(Error::MissingField("timestamp"))));
}

#[cfg(test)]
#[test]
fn contains_is_inclusive() {
    let c = candle(100.0, 110.0, 95.0, 105.0).unwrap();
    assert!(c.contains(95.0));
    assert!(c.contains(110.0));
    assert!(c.contains(100.0));
    assert!(!c.contains(94.99));
    assert!(!c.contains(110.01));
}
