use ta::{Next, indicators::SimpleMovingAverage};

use super::{Strategy, check_percent, check_period};
use crate::PercentCalculus;
use crate::engine::{Candle, OrderIntent, OrderSide};
use crate::errors::{Error, Result};

/// Trades the open price against a simple moving average of the close.
///
/// Above the average it sells, expecting the price to climb further; below it buys.
/// Nothing is proposed until the window holds `period` closes.
#[derive(Debug, Clone)]
pub struct MaCrossover {
    sma: SimpleMovingAverage,
    period: usize,
    samples: usize,
    take_profit_percent: f64,
    cancel_percent: f64,
}

impl MaCrossover {
    /// Creates the strategy.
    ///
    /// ### Arguments
    /// * `period` - Moving average window (e.g., 100).
    /// * `take_profit_percent` - Take-profit distance from the open (e.g., 5.0 for 5%).
    /// * `cancel_percent` - Cancel distance from the open (e.g., 10.0 for 10%).
    pub fn new(period: usize, take_profit_percent: f64, cancel_percent: f64) -> Result<Self> {
        let period = check_period("period", period)?;
        let sma = SimpleMovingAverage::new(period).map_err(|e| Error::Msg(e.to_string()))?;
        Ok(Self {
            sma,
            period,
            samples: 0,
            take_profit_percent: check_percent("take_profit_percent", take_profit_percent)?,
            cancel_percent: check_percent("cancel_percent", cancel_percent)?,
        })
    }

    /// Feeds the close of `candle` and returns the average once the window is full.
    pub(crate) fn update(&mut self, candle: &Candle) -> Option<f64> {
        let average = self.sma.next(candle.close());
        self.samples = self.samples.saturating_add(1);
        (self.samples >= self.period).then_some(average)
    }

    /// Side and levels for an open price against `average`.
    pub(crate) fn signal(&self, open: f64, average: f64) -> Option<OrderIntent> {
        let (tp, cancel) = (self.take_profit_percent, self.cancel_percent);
        if open > average {
            Some((OrderSide::Sell, open.addpercent(tp), open.subpercent(cancel)).into())
        } else if open < average {
            Some((OrderSide::Buy, open.subpercent(tp), open.addpercent(cancel)).into())
        } else {
            None
        }
    }
}

impl Strategy for MaCrossover {
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        let average = self.update(candle)?;
        self.signal(candle.open(), average)
    }

    fn name(&self) -> &str {
        "ma-crossover"
    }
}

#[cfg(test)]
use super::candle_at;

#[cfg(test)]
#[test]
fn waits_for_a_full_window() {
    let mut strategy = MaCrossover::new(3, 5.0, 10.0).unwrap();
    assert!(strategy.decide(&candle_at(100.0, 100.0)).is_none());
    assert!(strategy.decide(&candle_at(100.0, 100.0)).is_none());
    assert!(strategy.decide(&candle_at(110.0, 100.0)).is_some());
}

#[cfg(test)]
#[test]
fn sells_above_the_average() {
    let mut strategy = MaCrossover::new(2, 5.0, 10.0).unwrap();
    strategy.decide(&candle_at(100.0, 100.0));
    let intent = strategy.decide(&candle_at(100.0, 90.0)).unwrap(); // average 95
    assert_eq!(intent.side, OrderSide::Sell);
    assert_eq!(intent.take_profit_price, 105.0);
    assert_eq!(intent.cancel_price, 90.0);
}

#[cfg(test)]
#[test]
fn buys_below_the_average() {
    let mut strategy = MaCrossover::new(2, 5.0, 10.0).unwrap();
    strategy.decide(&candle_at(100.0, 100.0));
    let intent = strategy.decide(&candle_at(100.0, 110.0)).unwrap(); // average 105
    assert_eq!(intent.side, OrderSide::Buy);
    assert_eq!(intent.take_profit_price, 95.0);
    assert_eq!(intent.cancel_price, 110.0);
}

#[cfg(test)]
#[test]
fn nothing_on_the_average() {
    let mut strategy = MaCrossover::new(1, 5.0, 10.0).unwrap();
    assert!(strategy.decide(&candle_at(100.0, 100.0)).is_none());
}
