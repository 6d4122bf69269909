use chrono::{DateTime, Utc};

use super::{Order, OrderIntent};
use crate::errors::{Error, Result};

/// Holds every order opened during a run. Orders are never removed.
///
/// The ledger only drives lifecycle transitions, it never touches the holdings.
#[derive(Debug, Default, Clone)]
pub struct OrderLedger {
    orders: Vec<Order>,
}

impl OrderLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new open order and returns it.
    pub fn open(
        &mut self,
        intent: &OrderIntent,
        reserved_amount: f64,
        open_price: f64,
        opened_at: DateTime<Utc>,
    ) -> &Order {
        let id = self.orders.len();
        self.orders
            .push(Order::new(id, intent, reserved_amount, open_price, opened_at));
        &self.orders[id]
    }

    /// Marks the order canceled at `at`.
    ///
    /// Fails with [`Error::InvalidState`] if the order is not open anymore.
    pub fn mark_canceled(&mut self, id: usize, at: DateTime<Utc>) -> Result<&Order> {
        let order = self.orders.get_mut(id).ok_or(Error::OrderNotFound(id))?;
        order.cancel(at)?;
        Ok(order)
    }

    /// Marks the order filled at `at`.
    ///
    /// Fails with [`Error::InvalidState`] if the order is not open anymore.
    pub fn mark_filled(&mut self, id: usize, at: DateTime<Utc>) -> Result<&Order> {
        let order = self.orders.get_mut(id).ok_or(Error::OrderNotFound(id))?;
        order.fill(at)?;
        Ok(order)
    }

    /// Returns `true` if the order exists and is still open.
    pub fn is_open(&self, id: usize) -> bool {
        self.orders.get(id).is_some_and(Order::is_open)
    }

    /// Returns the order with the given id.
    pub fn get(&self, id: usize) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Returns an iterator over all orders, in opening order.
    pub fn iter(&self) -> std::slice::Iter<'_, Order> {
        self.orders.iter()
    }

    /// Returns an iterator over the orders still open.
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.is_open())
    }

    /// Returns the number of orders still open.
    pub fn count_open(&self) -> usize {
        self.open_orders().count()
    }

    /// Returns the number of orders ever opened.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Returns `true` if no order was ever opened.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Returns the orders as a slice.
    pub fn as_slice(&self) -> &[Order] {
        &self.orders
    }

    pub(crate) fn clear(&mut self) {
        self.orders.clear();
    }
}

#[cfg(test)]
use super::{OrderSide, OrderState};

#[cfg(test)]
fn intent(side: OrderSide) -> OrderIntent {
    (side, 105.0, 90.0).into()
}

#[cfg(test)]
#[test]
fn open_assigns_sequential_ids() {
    let mut ledger = OrderLedger::new();
    assert!(ledger.is_empty());
    let id0 = ledger.open(&intent(OrderSide::Sell), 0.1, 100.0, DateTime::default()).id();
    let id1 = ledger.open(&intent(OrderSide::Buy), 10.0, 100.0, DateTime::default()).id();
    assert_eq!((id0, id1), (0, 1));
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.count_open(), 2);
    assert!(ledger.is_open(0));
    assert!(!ledger.is_open(2));
}

#[cfg(test)]
#[test]
fn mark_canceled_and_filled() {
    let mut ledger = OrderLedger::new();
    ledger.open(&intent(OrderSide::Sell), 0.1, 100.0, DateTime::default());
    ledger.open(&intent(OrderSide::Buy), 10.0, 100.0, DateTime::default());

    let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let canceled = ledger.mark_canceled(0, at).unwrap();
    assert_eq!(canceled.state(), OrderState::Canceled);
    let filled = ledger.mark_filled(1, at).unwrap();
    assert_eq!(filled.filled_at(), Some(at));

    assert_eq!(ledger.count_open(), 0);
    assert_eq!(ledger.open_orders().count(), 0);
    assert_eq!(ledger.len(), 2);
}

#[cfg(test)]
#[test]
fn transition_on_terminal_order_fails_loudly() {
    let mut ledger = OrderLedger::new();
    ledger.open(&intent(OrderSide::Sell), 0.1, 100.0, DateTime::default());
    ledger.mark_filled(0, DateTime::default()).unwrap();

    assert!(matches!(
        ledger.mark_canceled(0, DateTime::default()),
        Err(Error::InvalidState { id: 0, .. })
    ));
    assert!(matches!(
        ledger.mark_filled(0, DateTime::default()),
        Err(Error::InvalidState { id: 0, .. })
    ));
}

#[cfg(test)]
#[test]
fn unknown_order() {
    let mut ledger = OrderLedger::new();
    assert!(matches!(ledger.mark_filled(3, DateTime::default()), Err(Error::OrderNotFound(3))));
    assert!(ledger.get(3).is_none());
}
