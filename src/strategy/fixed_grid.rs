use super::{Alternation, Strategy, check_percent};
use crate::PercentCalculus;
use crate::engine::{Candle, OrderIntent, OrderSide};
use crate::errors::Result;

/// Places a buy on odd candles and a sell on even ones, one grid step away from the open.
#[derive(Debug, Clone)]
pub struct FixedGrid {
    alternation: Alternation,
    grid_percent: f64,
    cancel_percent: f64,
}

impl FixedGrid {
    /// Creates the strategy.
    ///
    /// ### Arguments
    /// * `grid_percent` - Take-profit distance from the open (e.g., 1.0 for 1%).
    /// * `cancel_percent` - Cancel distance from the open (e.g., 10.0 for 10%).
    pub fn new(grid_percent: f64, cancel_percent: f64) -> Result<Self> {
        Ok(Self {
            alternation: Alternation::default(),
            grid_percent: check_percent("grid_percent", grid_percent)?,
            cancel_percent: check_percent("cancel_percent", cancel_percent)?,
        })
    }
}

impl Strategy for FixedGrid {
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        let open = candle.open();
        let intent = if self.alternation.next_is_buy() {
            (OrderSide::Buy, open.subpercent(self.grid_percent), open.addpercent(self.cancel_percent))
        } else {
            (OrderSide::Sell, open.addpercent(self.grid_percent), open.subpercent(self.cancel_percent))
        };
        Some(intent.into())
    }

    fn name(&self) -> &str {
        "fixed-grid"
    }
}

#[cfg(test)]
#[test]
fn alternates_from_a_buy() {
    let mut grid = FixedGrid::new(1.0, 10.0).unwrap();
    let candle = super::candle_at(100.0, 100.0);

    let buy = grid.decide(&candle).unwrap();
    assert_eq!(buy.side, OrderSide::Buy);
    assert_eq!(buy.take_profit_price, 99.0);
    assert_eq!(buy.cancel_price, 110.0);

    let sell = grid.decide(&candle).unwrap();
    assert_eq!(sell.side, OrderSide::Sell);
    assert_eq!(sell.take_profit_price, 101.0);
    assert_eq!(sell.cancel_price, 90.0);

    assert_eq!(grid.decide(&candle).unwrap().side, OrderSide::Buy);
}
