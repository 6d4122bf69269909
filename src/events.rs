use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Order, OrderIntent, OrderSide};

/// Something that happened to an order during a replay.
///
/// The engine records every event in its log and forwards it to the injected [`Observer`], if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// A strategy intent was accepted and its capital reserved.
    OrderOpened(Order),

    /// An order reached its cancel price and released its capital.
    OrderCanceled(Order),

    /// An order reached its take-profit price and was settled.
    OrderFilled(Order),

    /// A strategy intent was dropped because the balance could not cover it.
    IntentDropped {
        /// Bar time.
        at: DateTime<Utc>,
        /// Side of the dropped intent.
        side: OrderSide,
        /// Bar open price.
        open_price: f64,
    },
}

impl Event {
    pub(crate) fn dropped(at: DateTime<Utc>, intent: &OrderIntent, open_price: f64) -> Self {
        Self::IntentDropped {
            at,
            side: intent.side,
            open_price,
        }
    }

    /// Returns the order concerned by the event, if one was created.
    pub fn order(&self) -> Option<&Order> {
        match self {
            Self::OrderOpened(order) | Self::OrderCanceled(order) | Self::OrderFilled(order) => Some(order),
            Self::IntentDropped { .. } => None,
        }
    }
}

/// Receives the replay events as they happen.
pub trait Observer: Send {
    /// Called once per event, in replay order.
    fn on_event(&mut self, event: &Event);
}

impl<F> Observer for F
where
    F: FnMut(&Event) + Send,
{
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Forwards replay events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::OrderOpened(o) => tracing::debug!(
                id = o.id(),
                side = %o.side(),
                amount = o.reserved_amount(),
                open_price = o.open_price(),
                take_profit = o.take_profit_price(),
                cancel = o.cancel_price(),
                "order opened"
            ),
            Event::OrderCanceled(o) => tracing::debug!(id = o.id(), side = %o.side(), at = ?o.canceled_at(), "order canceled"),
            Event::OrderFilled(o) => tracing::debug!(id = o.id(), side = %o.side(), at = ?o.filled_at(), "order filled"),
            Event::IntentDropped { at, side, open_price } => {
                tracing::debug!(%at, %side, open_price, "intent dropped: insufficient balance")
            }
        }
    }
}

#[cfg(test)]
#[test]
fn event_json_is_tagged() {
    let intent = OrderIntent::from((OrderSide::Buy, 95.0, 110.0));
    let event = Event::dropped(DateTime::default(), &intent, 100.0);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "intentDropped");
    assert_eq!(json["side"], "BUY");
    assert_eq!(json["openPrice"], 100.0);
    assert!(json.get("open_price").is_none());
    assert_eq!(serde_json::from_value::<Event>(json).unwrap(), event);
    assert!(event.order().is_none());
}

#[cfg(test)]
#[test]
fn closures_are_observers() {
    let mut seen = 0;
    {
        let mut observer = |_: &Event| seen += 1;
        let intent = OrderIntent::from((OrderSide::Sell, 105.0, 90.0));
        observer.on_event(&Event::dropped(DateTime::default(), &intent, 100.0));
        observer.on_event(&Event::dropped(DateTime::default(), &intent, 100.0));
    }
    assert_eq!(seen, 2);
}
