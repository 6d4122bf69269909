use std::sync::Arc;

use crate::{
    config::BacktestOptions,
    engine::*,
    errors::{Error, Result},
    events::{Event, Observer},
    portfolio::Portfolio,
    strategy::Strategy,
};

#[cfg(test)]
impl Iterator for Backtest {
    type Item = Candle;

    fn next(&mut self) -> Option<Self::Item> {
        let candle = self.data.get(self.index).cloned();
        self.index += 1;
        candle
    }
}

/// Replay engine: walks the candles once and matches orders against each candle's range.
///
/// Every candle goes through two phases, in this order:
/// 1. **Resolution**: each open order is canceled if its cancel price lies in `[low, high]`,
///    otherwise filled if its take-profit price does. Cancellation wins when both do.
/// 2. **Opening**: the strategy is polled once. Its intent becomes an order if the holdings cover it,
///    and is dropped otherwise.
///
/// An order opened on a candle is therefore resolved from the next candle on.
/// Orders still open at the end of the series stay open.
pub struct Backtest {
    #[cfg(test)]
    index: usize,
    holdings: Holdings,
    data: Arc<[Candle]>,
    ledger: OrderLedger,
    events: Vec<Event>,
    observer: Option<Box<dyn Observer>>,
}

impl std::ops::Deref for Backtest {
    type Target = Holdings;

    fn deref(&self) -> &Self::Target {
        &self.holdings
    }
}

impl std::fmt::Debug for Backtest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backtest")
            .field("holdings", &self.holdings)
            .field("candles", &self.data.len())
            .field("orders", &self.ledger.len())
            .field("events", &self.events.len())
            .finish()
    }
}

impl Backtest {
    /// Creates a new backtest instance.
    ///
    /// ### Arguments
    /// * `data` - Candles, ordered by time.
    /// * `options` - Pair, amount per order and initial holdings.
    ///
    /// ### Returns
    /// The new backtest instance, or an error if `data` is empty or the options are invalid.
    ///
    /// ### Example
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use replay_bts::prelude::*;
    /// use chrono::DateTime;
    ///
    /// let candle = CandleBuilder::builder()
    ///     .open(100.0)
    ///     .high(110.0)
    ///     .low(95.0)
    ///     .close(105.0)
    ///     .timestamp(DateTime::default())
    ///     .build()
    ///     .unwrap();
    ///
    /// let options = BacktestOptions::new("BTC/USDT", 10.0, 1_000.0, 1.0);
    /// let bts = Backtest::new(Arc::from_iter(vec![candle]), &options).unwrap();
    /// assert_eq!(bts.quote(), 1_000.0);
    /// ```
    pub fn new(data: Arc<[Candle]>, options: &BacktestOptions) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::CandleDataEmpty);
        }

        Ok(Self {
            #[cfg(test)]
            index: 0,
            holdings: Holdings::new(options)?,
            data,
            ledger: OrderLedger::new(),
            events: Vec::new(),
            observer: None,
        })
    }

    /// Forwards every event to `observer` as well.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Returns the holdings.
    pub fn holdings(&self) -> &Holdings {
        &self.holdings
    }

    /// Returns an iterator over the data.
    pub fn candles(&self) -> std::slice::Iter<'_, Candle> {
        self.data.iter()
    }

    /// Returns an iterator over every order opened so far.
    pub fn orders(&self) -> std::slice::Iter<'_, Order> {
        self.ledger.iter()
    }

    /// Returns the order ledger.
    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    /// Returns an iterator over the recorded events.
    pub fn events(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Replays every candle through `strategy`.
    ///
    /// ### Returns
    /// Ok once the series is exhausted. An error means the engine broke an order lifecycle rule.
    ///
    /// ### Example
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use replay_bts::prelude::*;
    /// use chrono::{DateTime, Duration};
    ///
    /// let bars = [(100.0, 110.0, 95.0, 105.0), (102.0, 108.0, 90.0, 100.0), (105.0, 120.0, 100.0, 110.0)];
    /// let candles = bars
    ///     .iter()
    ///     .enumerate()
    ///     .map(|(i, &(open, high, low, close))| {
    ///         CandleBuilder::builder()
    ///             .open(open)
    ///             .high(high)
    ///             .low(low)
    ///             .close(close)
    ///             .timestamp(DateTime::default() + Duration::hours(i as i64))
    ///             .build()
    ///     })
    ///     .collect::<Result<Vec<_>>>()
    ///     .unwrap();
    ///
    /// let options = BacktestOptions::new("BTC/USDT", 10.0, 0.0, 1.0);
    /// let mut bts = Backtest::new(Arc::from_iter(candles), &options).unwrap();
    ///
    /// let mut first = true;
    /// let mut strategy = FnStrategy::new("once", move |_: &Candle| {
    ///     std::mem::take(&mut first).then(|| (OrderSide::Sell, 105.0, 90.0).into())
    /// });
    /// bts.run(&mut strategy).unwrap();
    ///
    /// let order = bts.orders().next().unwrap();
    /// assert_eq!(order.state(), OrderState::Canceled);
    /// assert_eq!(bts.base(), 1.0);
    /// ```
    pub fn run<S>(&mut self, strategy: &mut S) -> Result<()>
    where
        S: Strategy + ?Sized,
    {
        let candles = Arc::clone(&self.data);
        for candle in candles.iter() {
            self.step(candle, strategy)?;
        }
        Ok(())
    }

    fn step<S>(&mut self, candle: &Candle, strategy: &mut S) -> Result<()>
    where
        S: Strategy + ?Sized,
    {
        self.resolve_orders(candle)?;
        if let Some(intent) = strategy.decide(candle) {
            self.open_order(candle, &intent);
        }
        Ok(())
    }

    fn resolve_orders(&mut self, candle: &Candle) -> Result<()> {
        let at = candle.timestamp();
        for id in 0..self.ledger.len() {
            let Some(order) = self.ledger.get(id).filter(|o| o.is_open()) else {
                continue;
            };
            let (cancel_price, take_profit_price) = (order.cancel_price(), order.take_profit_price());

            if candle.contains(cancel_price) {
                let order = self.ledger.mark_canceled(id, at)?.clone();
                self.holdings.settle_cancel(&order);
                self.emit(Event::OrderCanceled(order));
                continue;
            }

            if candle.contains(take_profit_price) {
                let order = self.ledger.mark_filled(id, at)?.clone();
                self.holdings.settle_fill(&order);
                self.emit(Event::OrderFilled(order));
            }
        }
        Ok(())
    }

    fn open_order(&mut self, candle: &Candle, intent: &OrderIntent) {
        let open_price = candle.open();
        match self.holdings.reserve(intent.side, open_price) {
            Some(reserved) => {
                let order = self
                    .ledger
                    .open(intent, reserved, open_price, candle.timestamp())
                    .clone();
                self.emit(Event::OrderOpened(order));
            }
            None => self.emit(Event::dropped(candle.timestamp(), intent, open_price)),
        }
    }

    fn emit(&mut self, event: Event) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
        self.events.push(event);
    }

    /// Builds the result record of the run so far.
    pub fn portfolio(&self, strategy: &str) -> Result<Portfolio> {
        Portfolio::new(&self.holdings, self.ledger.as_slice(), &self.data, strategy)
    }

    /// Resets the backtest to its initial state.
    pub fn reset(&mut self) {
        #[cfg(test)]
        {
            self.index = 0;
        }

        self.holdings.reset();
        self.ledger.clear();
        self.events = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, mpsc};

    use crate::engine::*;
    use crate::errors::Error;
    use crate::events::Event;
    use crate::strategy::{FixedGrid, FnStrategy, Strategy};
    use crate::PercentCalculus;
    use crate::config::BacktestOptions;

    use chrono::{DateTime, Duration};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn candle(open: f64, high: f64, low: f64, close: f64, hour: i64) -> Candle {
        CandleBuilder::builder()
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .timestamp(DateTime::from_timestamp_secs(1515151515).unwrap() + Duration::hours(hour))
            .build()
            .unwrap()
    }

    fn get_data() -> Arc<[Candle]> {
        Arc::from_iter(vec![
            candle(100.0, 110.0, 95.0, 105.0, 0),
            candle(102.0, 108.0, 90.0, 100.0, 1),
            candle(105.0, 120.0, 100.0, 110.0, 2),
        ])
    }

    fn get_sell_fill_data() -> Arc<[Candle]> {
        Arc::from_iter(vec![
            candle(100.0, 110.0, 95.0, 105.0, 0),
            candle(104.0, 106.0, 100.0, 105.0, 1),
        ])
    }

    fn get_random_data(seed: u64, len: usize) -> Arc<[Candle]> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut open = 100.0;
        let mut candles = Vec::with_capacity(len);
        for hour in 0..len {
            let close: f64 = open * rng.random_range(0.9..1.1);
            let high = open.max(close) * rng.random_range(1.0..1.05);
            let low = open.min(close) * rng.random_range(0.95..1.0);
            candles.push(candle(open, high, low, close, hour as i64));
            open = close;
        }
        Arc::from_iter(candles)
    }

    /// Opens one order with the given levels on the first candle only.
    fn once(side: OrderSide, take_profit: f64, cancel: f64) -> impl Strategy {
        let mut first = true;
        FnStrategy::new("once", move |_: &Candle| {
            std::mem::take(&mut first).then(|| (side, take_profit, cancel).into())
        })
    }

    fn options(quote: f64, base: f64) -> BacktestOptions {
        BacktestOptions::new("BTC/USDT", 10.0, quote, base)
    }

    #[test]
    fn new_rejects_empty_data() {
        let result = Backtest::new(Arc::from_iter(Vec::<Candle>::new()), &options(1.0, 1.0));
        assert!(matches!(result, Err(Error::CandleDataEmpty)));
    }

    #[test]
    fn new_rejects_invalid_options() {
        let result = Backtest::new(get_data(), &BacktestOptions::new("BTC/USDT", 0.0, 1.0, 1.0));
        assert!(matches!(result, Err(Error::NegZeroAmountPerOrder(_))));
    }

    #[test]
    fn scenario_sell_canceled_before_take_profit() {
        let mut bt = Backtest::new(get_data(), &options(0.0, 1.0)).unwrap();
        let mut strategy = once(OrderSide::Sell, 105.0, 90.0);

        let candle = bt.next().unwrap();
        bt.step(&candle, &mut strategy).unwrap();

        let order = bt.orders().next().cloned().unwrap();
        assert_eq!(order.reserved_amount(), 0.1);
        assert_eq!(order.open_price(), 100.0);
        assert!(order.is_open());
        assert_eq!(bt.base(), 0.9);

        // next tick: low 90 hits the cancel price, take-profit 105 is also in range
        let candle = bt.next().unwrap();
        bt.step(&candle, &mut strategy).unwrap();

        let order = bt.orders().next().unwrap();
        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(order.canceled_at(), Some(candle.timestamp()));
        assert!(order.filled_at().is_none());
        assert_eq!(bt.base(), 1.0);
        assert_eq!(bt.quote(), 0.0);

        // next tick: nothing left to resolve
        let candle = bt.next().unwrap();
        bt.step(&candle, &mut strategy).unwrap();
        assert_eq!(bt.ledger().count_open(), 0);
        assert_eq!(bt.ledger().len(), 1);
    }

    #[test]
    fn scenario_sell_take_profit() {
        let mut bt = Backtest::new(get_sell_fill_data(), &options(0.0, 1.0)).unwrap();
        bt.run(&mut once(OrderSide::Sell, 105.0, 90.0)).unwrap();

        let order = bt.orders().next().unwrap();
        assert_eq!(order.state(), OrderState::Filled);
        assert!(order.canceled_at().is_none());
        assert_eq!(bt.base(), 0.9);
        assert_eq!(bt.quote(), 10.0); // 0.1 at the open price 100
    }

    #[test]
    fn scenario_buy_take_profit() {
        let data = Arc::from_iter(vec![
            candle(100.0, 110.0, 95.0, 105.0, 0),
            candle(98.0, 99.0, 94.0, 96.0, 1),
        ]);
        let mut bt = Backtest::new(data, &options(100.0, 0.0)).unwrap();
        let price = 100.0;
        bt.run(&mut once(OrderSide::Buy, price.subpercent(5.0), price.addpercent(10.0)))
            .unwrap();

        let order = bt.orders().next().unwrap();
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.reserved_amount(), 10.0);
        assert_eq!(bt.quote(), 90.0);
        assert_eq!(bt.base(), 0.1);
    }

    #[test]
    fn scenario_buy_canceled_uses_open_price() {
        let data = Arc::from_iter(vec![
            candle(100.0, 105.0, 96.0, 100.0, 0),
            candle(105.0, 111.0, 100.0, 110.0, 1),
        ]);
        let mut bt = Backtest::new(data, &options(100.0, 0.0)).unwrap();
        bt.run(&mut once(OrderSide::Buy, 95.0, 110.0)).unwrap();

        let order = bt.orders().next().unwrap();
        assert_eq!(order.state(), OrderState::Canceled);
        // 10 reserved quote units times the open price
        assert_eq!(bt.quote(), 90.0 + 1_000.0);
        assert_eq!(bt.base(), 0.0);
    }

    #[test]
    fn order_is_not_resolved_on_its_opening_candle() {
        // both levels lie inside the first candle
        let mut bt = Backtest::new(get_data(), &options(0.0, 1.0)).unwrap();
        let mut strategy = once(OrderSide::Sell, 108.0, 96.0);

        let candle = bt.next().unwrap();
        bt.step(&candle, &mut strategy).unwrap();
        assert!(bt.ledger().is_open(0));

        let candle = bt.next().unwrap();
        bt.step(&candle, &mut strategy).unwrap();
        assert_eq!(bt.ledger().get(0).unwrap().state(), OrderState::Canceled);
    }

    #[test]
    fn unresolved_orders_stay_open() {
        let mut bt = Backtest::new(get_data(), &options(0.0, 1.0)).unwrap();
        bt.run(&mut once(OrderSide::Sell, 500.0, 10.0)).unwrap();

        assert!(bt.ledger().is_open(0));
        assert_eq!(bt.base(), 0.9);
        assert_eq!(bt.quote(), 0.0);
    }

    #[test]
    fn insufficient_balance_drops_intents() {
        let mut bt = Backtest::new(get_data(), &options(5.0, 0.05)).unwrap();
        let mut strategy = FixedGrid::new(1.0, 10.0).unwrap();
        bt.run(&mut strategy).unwrap();

        assert!(bt.ledger().is_empty());
        assert_eq!(bt.base(), 0.05);
        assert_eq!(bt.quote(), 5.0);
        assert_eq!(bt.events().count(), 3);
        assert!(bt.events().all(|e| matches!(e, Event::IntentDropped { .. })));
    }

    #[test]
    fn one_order_per_candle_at_most() {
        let mut bt = Backtest::new(get_random_data(7, 50), &options(1_000_000.0, 1_000.0)).unwrap();
        bt.run(&mut FixedGrid::new(1.0, 10.0).unwrap()).unwrap();
        assert_eq!(bt.ledger().len(), 50);
    }

    #[test]
    fn conservation_without_orders() {
        let mut bt = Backtest::new(get_random_data(1, 200), &options(1_000.0, 2.0)).unwrap();
        bt.run(&mut FnStrategy::new("idle", |_: &Candle| None)).unwrap();

        assert!(bt.ledger().is_empty());
        assert_eq!(bt.base(), bt.initial_base());
        assert_eq!(bt.quote(), bt.initial_quote());
    }

    #[test]
    fn canceled_and_filled_are_exclusive() {
        for seed in 0..10 {
            let mut bt = Backtest::new(get_random_data(seed, 300), &options(10_000.0, 10.0)).unwrap();
            bt.run(&mut FixedGrid::new(2.0, 5.0).unwrap()).unwrap();
            assert!(!bt.ledger().is_empty());

            for order in bt.orders() {
                match order.state() {
                    OrderState::Open => assert!(order.canceled_at().is_none() && order.filled_at().is_none()),
                    OrderState::Canceled => assert!(order.canceled_at().is_some() && order.filled_at().is_none()),
                    OrderState::Filled => assert!(order.filled_at().is_some() && order.canceled_at().is_none()),
                }
                assert!(order.canceled_at().is_none() || order.filled_at().is_none());
            }
            assert!(bt.base() >= 0.0);
        }
    }

    #[test]
    fn cancel_wins_when_both_levels_are_in_range() {
        for seed in 0..10 {
            let mut bt = Backtest::new(get_random_data(seed, 300), &options(10_000.0, 10.0)).unwrap();
            bt.run(&mut FixedGrid::new(2.0, 5.0).unwrap()).unwrap();

            for order in bt.orders().filter(|o| o.state() == OrderState::Filled) {
                let at = order.filled_at().unwrap();
                let candle = bt.candles().find(|c| c.timestamp() == at).unwrap();
                assert!(!candle.contains(order.cancel_price()));
            }
        }
    }

    #[test]
    fn events_are_recorded_and_observed() {
        let (tx, rx) = mpsc::channel();
        let mut bt = Backtest::new(get_data(), &options(0.0, 1.0))
            .unwrap()
            .with_observer(move |event: &Event| {
                let _ = tx.send(event.clone());
            });
        bt.run(&mut once(OrderSide::Sell, 105.0, 90.0)).unwrap();

        let recorded: Vec<Event> = bt.events().cloned().collect();
        let observed: Vec<Event> = rx.try_iter().collect();
        assert_eq!(recorded, observed);
        assert!(matches!(recorded[0], Event::OrderOpened(_)));
        assert!(matches!(recorded[1], Event::OrderCanceled(_)));
        assert_eq!(recorded.len(), 2);
    }

    #[test]
    fn reset_replays_identically() {
        let mut bt = Backtest::new(get_random_data(3, 100), &options(1_000.0, 5.0)).unwrap();
        bt.run(&mut FixedGrid::new(1.0, 10.0).unwrap()).unwrap();
        let first: Vec<Order> = bt.orders().cloned().collect();
        let (base, quote) = (bt.base(), bt.quote());

        bt.reset();
        assert!(bt.ledger().is_empty());
        assert_eq!(bt.events().count(), 0);
        assert_eq!((bt.base(), bt.quote()), (5.0, 1_000.0));

        bt.run(&mut FixedGrid::new(1.0, 10.0).unwrap()).unwrap();
        let second: Vec<Order> = bt.orders().cloned().collect();
        assert_eq!(first, second);
        assert_eq!((bt.base(), bt.quote()), (base, quote));
    }
}
