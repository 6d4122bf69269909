use super::{Alternation, Strategy, check_percent};
use crate::PercentCalculus;
use crate::engine::{Candle, OrderIntent, OrderSide};
use crate::errors::{Error, Result};

/// Like [`FixedGrid`](super::FixedGrid), with the take-profit a fixed number of quote units away.
#[derive(Debug, Clone)]
pub struct StepAlternating {
    alternation: Alternation,
    take_profit_offset: f64,
    cancel_percent: f64,
}

impl StepAlternating {
    /// Creates the strategy.
    ///
    /// ### Arguments
    /// * `take_profit_offset` - Take-profit distance from the open, in quote units (e.g., 10.0).
    /// * `cancel_percent` - Cancel distance from the open (e.g., 10.0 for 10%).
    pub fn new(take_profit_offset: f64, cancel_percent: f64) -> Result<Self> {
        if !take_profit_offset.is_finite() || take_profit_offset <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "take_profit_offset must be positive (got: {take_profit_offset})"
            )));
        }
        Ok(Self {
            alternation: Alternation::default(),
            take_profit_offset,
            cancel_percent: check_percent("cancel_percent", cancel_percent)?,
        })
    }
}

impl Strategy for StepAlternating {
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        let open = candle.open();
        let offset = self.take_profit_offset;
        let intent = if self.alternation.next_is_buy() {
            (OrderSide::Buy, open - offset, open.addpercent(self.cancel_percent))
        } else {
            (OrderSide::Sell, open + offset, open.subpercent(self.cancel_percent))
        };
        Some(intent.into())
    }

    fn name(&self) -> &str {
        "step-alternating"
    }
}

#[cfg(test)]
#[test]
fn absolute_take_profit() {
    let mut strategy = StepAlternating::new(10.0, 10.0).unwrap();
    let candle = super::candle_at(200.0, 200.0);

    let buy = strategy.decide(&candle).unwrap();
    assert_eq!((buy.side, buy.take_profit_price, buy.cancel_price), (OrderSide::Buy, 190.0, 220.0));

    let sell = strategy.decide(&candle).unwrap();
    assert_eq!((sell.side, sell.take_profit_price, sell.cancel_price), (OrderSide::Sell, 210.0, 180.0));
}

#[cfg(test)]
#[test]
fn rejects_non_positive_offset() {
    assert!(matches!(StepAlternating::new(0.0, 10.0), Err(Error::InvalidParameter(_))));
}
