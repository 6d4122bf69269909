use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Represents the side of an order.
///
/// In a `BASE/QUOTE` pair, `Buy` acquires the base asset with quote units
/// and `Sell` disposes of base units for quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Acquire the base asset.
    Buy,
    /// Dispose of the base asset.
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle state of an order. `Canceled` and `Filled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    /// Waiting for its cancel or take-profit price.
    Open,
    /// Abandoned at its cancel price.
    Canceled,
    /// Closed at its take-profit price.
    Filled,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Filled => write!(f, "FILLED"),
        }
    }
}

/// A new order proposed by a strategy, consumed in the same step it is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderIntent {
    /// Direction of the order.
    pub side: OrderSide,
    /// Price at which the order is closed favorably.
    pub take_profit_price: f64,
    /// Price at which the order is abandoned.
    pub cancel_price: f64,
}

type Intent = (OrderSide, f64, f64);
impl From<Intent> for OrderIntent {
    fn from((side, take_profit_price, cancel_price): Intent) -> Self {
        Self {
            side,
            take_profit_price,
            cancel_price,
        }
    }
}

/// An order owned by the [`OrderLedger`](super::OrderLedger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: usize,
    #[serde(rename = "orderType")]
    side: OrderSide,
    state: OrderState,
    opened_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
    filled_at: Option<DateTime<Utc>>,
    #[serde(rename = "amount")]
    reserved_amount: f64,
    open_price: f64,
    take_profit_price: f64,
    cancel_price: f64,
}

impl Order {
    pub(crate) fn new(
        id: usize,
        intent: &OrderIntent,
        reserved_amount: f64,
        open_price: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            side: intent.side,
            state: OrderState::Open,
            opened_at,
            canceled_at: None,
            filled_at: None,
            reserved_amount,
            open_price,
            take_profit_price: intent.take_profit_price,
            cancel_price: intent.cancel_price,
        }
    }

    /// Returns the ledger id of the order.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the side of the order.
    pub fn side(&self) -> OrderSide {
        self.side
    }

    /// Returns the current state of the order.
    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Returns `true` while the order is neither canceled nor filled.
    pub fn is_open(&self) -> bool {
        self.state == OrderState::Open
    }

    /// Returns the open time.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Returns the cancel time, if canceled.
    pub fn canceled_at(&self) -> Option<DateTime<Utc>> {
        self.canceled_at
    }

    /// Returns the fill time, if filled.
    pub fn filled_at(&self) -> Option<DateTime<Utc>> {
        self.filled_at
    }

    /// Returns the reserved amount: base units for a sell, quote units for a buy.
    pub fn reserved_amount(&self) -> f64 {
        self.reserved_amount
    }

    /// Returns the candle open price at creation.
    pub fn open_price(&self) -> f64 {
        self.open_price
    }

    /// Returns the take-profit price.
    pub fn take_profit_price(&self) -> f64 {
        self.take_profit_price
    }

    /// Returns the cancel price.
    pub fn cancel_price(&self) -> f64 {
        self.cancel_price
    }

    pub(crate) fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.close(OrderState::Canceled)?;
        self.canceled_at = Some(at);
        Ok(())
    }

    pub(crate) fn fill(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.close(OrderState::Filled)?;
        self.filled_at = Some(at);
        Ok(())
    }

    fn close(&mut self, to: OrderState) -> Result<()> {
        if !self.is_open() {
            return Err(Error::InvalidState {
                id: self.id,
                state: self.state,
                attempted: to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
fn open_order(side: OrderSide) -> Order {
    let intent = OrderIntent::from((side, 105.0, 90.0));
    Order::new(0, &intent, 0.1, 100.0, DateTime::default())
}

#[cfg(test)]
#[test]
fn create_order_from_intent() {
    let order = open_order(OrderSide::Sell);
    assert_eq!(order.id(), 0);
    assert_eq!(order.side(), OrderSide::Sell);
    assert_eq!(order.state(), OrderState::Open);
    assert_eq!(order.reserved_amount(), 0.1);
    assert_eq!(order.open_price(), 100.0);
    assert_eq!(order.take_profit_price(), 105.0);
    assert_eq!(order.cancel_price(), 90.0);
    assert!(order.canceled_at().is_none());
    assert!(order.filled_at().is_none());
}

#[cfg(test)]
#[test]
fn cancel_then_fill_fails() {
    let mut order = open_order(OrderSide::Buy);
    let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    order.cancel(at).unwrap();
    assert_eq!(order.state(), OrderState::Canceled);
    assert_eq!(order.canceled_at(), Some(at));

    let result = order.fill(at);
    assert!(matches!(
        result,
        Err(Error::InvalidState {
            state: OrderState::Canceled,
            attempted: OrderState::Filled,
            ..
        })
    ));
    assert!(order.filled_at().is_none());
}

#[cfg(test)]
#[test]
fn fill_twice_fails() {
    let mut order = open_order(OrderSide::Sell);
    order.fill(DateTime::default()).unwrap();
    assert!(!order.is_open());
    assert!(matches!(order.fill(DateTime::default()), Err(Error::InvalidState { .. })));
    assert!(matches!(order.cancel(DateTime::default()), Err(Error::InvalidState { .. })));
    assert!(order.canceled_at().is_none());
}

#[cfg(test)]
#[test]
fn order_json_layout() {
    let order = open_order(OrderSide::Sell);
    let json = serde_json::to_value(&order).unwrap();
    assert_eq!(json["orderType"], "SELL");
    assert_eq!(json["state"], "OPEN");
    assert_eq!(json["amount"], 0.1);
    assert_eq!(json["takeProfitPrice"], 105.0);
    assert_eq!(json["cancelPrice"], 90.0);
    assert!(json["filledAt"].is_null());
}
