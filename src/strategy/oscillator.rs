use ta::{Next, indicators::RelativeStrengthIndex};

use super::{MaCrossover, Strategy, check_period};
use crate::engine::{Candle, OrderIntent, OrderSide};
use crate::errors::{Error, Result};

/// [`MaCrossover`] filtered by the RSI of the close.
///
/// Sells only while the RSI is under the overbought level, buys only while it is over the oversold one.
#[derive(Debug, Clone)]
pub struct Oscillator {
    crossover: MaCrossover,
    rsi: RelativeStrengthIndex,
    oversold: f64,
    overbought: f64,
}

impl Oscillator {
    /// Creates the strategy with the 30/70 bounds.
    pub fn new(period: usize, rsi_period: usize, take_profit_percent: f64, cancel_percent: f64) -> Result<Self> {
        let rsi_period = check_period("rsi_period", rsi_period)?;
        Ok(Self {
            crossover: MaCrossover::new(period, take_profit_percent, cancel_percent)?,
            rsi: RelativeStrengthIndex::new(rsi_period).map_err(|e| Error::Msg(e.to_string()))?,
            oversold: super::defaults::oversold(),
            overbought: super::defaults::overbought(),
        })
    }

    /// Replaces the RSI bounds.
    pub fn with_bounds(mut self, oversold: f64, overbought: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) || oversold >= overbought {
            return Err(Error::InvalidParameter(format!(
                "RSI bounds must satisfy 0 <= oversold < overbought <= 100 (got: {oversold}, {overbought})"
            )));
        }
        self.oversold = oversold;
        self.overbought = overbought;
        Ok(self)
    }
}

impl Strategy for Oscillator {
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        let rsi = self.rsi.next(candle.close());
        let average = self.crossover.update(candle)?;
        let intent = self.crossover.signal(candle.open(), average)?;
        let allowed = match intent.side {
            OrderSide::Sell => rsi < self.overbought,
            OrderSide::Buy => rsi > self.oversold,
        };
        allowed.then_some(intent)
    }

    fn name(&self) -> &str {
        "oscillator"
    }
}

#[cfg(test)]
use super::candle_at;

#[cfg(test)]
#[test]
fn rejects_inverted_bounds() {
    let strategy = Oscillator::new(2, 2, 5.0, 10.0).unwrap();
    assert!(matches!(strategy.with_bounds(70.0, 30.0), Err(Error::InvalidParameter(_))));
}

#[cfg(test)]
#[test]
fn overbought_blocks_sells() {
    // Rising closes push the RSI close to 100.
    let mut strategy = Oscillator::new(2, 2, 5.0, 10.0).unwrap();
    strategy.decide(&candle_at(100.0, 100.0));
    strategy.decide(&candle_at(100.0, 101.0));
    assert!(strategy.decide(&candle_at(110.0, 102.0)).is_none());
}

#[cfg(test)]
#[test]
fn oversold_blocks_buys() {
    // Falling closes push the RSI to 0.
    let mut strategy = Oscillator::new(2, 2, 5.0, 10.0).unwrap();
    strategy.decide(&candle_at(100.0, 100.0));
    strategy.decide(&candle_at(100.0, 99.0));
    assert!(strategy.decide(&candle_at(90.0, 98.0)).is_none());
}

#[cfg(test)]
#[test]
fn neutral_rsi_lets_the_crossover_through() {
    let mut strategy = Oscillator::new(2, 2, 5.0, 10.0).unwrap();
    strategy.decide(&candle_at(100.0, 100.0));
    strategy.decide(&candle_at(100.0, 102.0));
    let intent = strategy.decide(&candle_at(110.0, 101.0)).unwrap();
    assert_eq!(intent.side, OrderSide::Sell);
}
