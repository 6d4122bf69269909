//! End-of-run summary.
//!
//! A [`Portfolio`] is built from the final holdings, the ledger and the price series, without
//! mutating any of them. It is the record stored and served by the query layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PercentCalculus;
use crate::engine::{Candle, Holdings, Order, OrderState};
use crate::errors::{Error, Result};

/// Days in an average year, leap years included.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// A metric that could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricWarning {
    /// The series spans no time, there is no CAGR.
    ZeroDuration,
    /// The initial holdings are worth nothing, there is no profit margin or CAGR.
    ZeroInitialValue,
}

impl From<MetricWarning> for Error {
    fn from(value: MetricWarning) -> Self {
        match value {
            MetricWarning::ZeroDuration => Error::ZeroDuration,
            MetricWarning::ZeroInitialValue => Error::ZeroInitialValue,
        }
    }
}

/// Result record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    /// Traded pair.
    pub pair: String,
    /// Base coin of the pair.
    pub base_coin: String,
    /// Quote coin of the pair.
    pub quote_coin: String,
    /// Quote value committed by every order.
    pub amount_per_order: f64,
    /// Base units at the start.
    pub initial_base_amount: f64,
    /// Free base units at the end.
    pub current_base_amount: f64,
    /// Quote units at the start.
    pub initial_quote_amount: f64,
    /// Free quote units at the end.
    pub current_quote_amount: f64,
    /// Initial holdings priced at the first open.
    pub initial_sum_amount: f64,
    /// Final holdings priced at the last open.
    pub current_sum_amount: f64,
    /// `current_sum_amount - initial_sum_amount`.
    pub profit: f64,
    /// Profit in percent of the initial value. `None` when that value is zero.
    pub profit_margin: Option<f64>,
    /// Compound annual growth rate in percent. `None` for a zero-duration series.
    pub cagr: Option<f64>,
    /// Metrics that could not be computed.
    #[serde(default)]
    pub warnings: Vec<MetricWarning>,
    /// Orders closed at their take-profit price.
    pub filled_orders: usize,
    /// Orders abandoned at their cancel price.
    pub canceled_orders: usize,
    /// Orders left unresolved at the end of the series.
    pub open_orders: usize,
    /// Every order of the run.
    pub orders: Vec<Order>,
    /// The replayed series.
    pub prices: Vec<Candle>,
    /// Strategy name.
    pub strategy: String,
    /// Creation time of the record.
    pub created_at: DateTime<Utc>,
}

impl Portfolio {
    /// Summarizes a run.
    ///
    /// ### Arguments
    /// * `holdings` - Final holdings.
    /// * `orders` - Every order of the run.
    /// * `prices` - The replayed series.
    /// * `strategy` - Strategy name.
    ///
    /// ### Returns
    /// The portfolio, or [`Error::CandleDataEmpty`] for an empty series. Undefined metrics are
    /// reported in `warnings`, not as errors.
    pub fn new(holdings: &Holdings, orders: &[Order], prices: &[Candle], strategy: &str) -> Result<Self> {
        let first = prices.first().ok_or(Error::CandleDataEmpty)?;
        let last = prices.last().ok_or(Error::CandleDataEmpty)?;

        let initial_sum_amount = holdings.initial_base() * first.open() + holdings.initial_quote();
        let current_sum_amount = holdings.base() * last.open() + holdings.quote();
        let profit = current_sum_amount - initial_sum_amount;

        let mut warnings = Vec::new();
        let profit_margin = if initial_sum_amount == 0.0 {
            warnings.push(MetricWarning::ZeroInitialValue);
            None
        } else {
            Some(initial_sum_amount.change(current_sum_amount))
        };

        let cagr = match calculate_cagr(first.timestamp(), last.timestamp(), initial_sum_amount, current_sum_amount) {
            Ok(cagr) => Some(cagr),
            Err(Error::ZeroDuration) => {
                warnings.push(MetricWarning::ZeroDuration);
                None
            }
            Err(Error::ZeroInitialValue) => None,
            Err(e) => return Err(e),
        };

        for warning in &warnings {
            tracing::warn!(?warning, strategy, pair = holdings.pair(), "metric is undefined");
        }

        let count = |state: OrderState| orders.iter().filter(|o| o.state() == state).count();

        Ok(Self {
            pair: holdings.pair().to_string(),
            base_coin: holdings.base_coin().to_string(),
            quote_coin: holdings.quote_coin().to_string(),
            amount_per_order: holdings.amount_per_order(),
            initial_base_amount: holdings.initial_base(),
            current_base_amount: holdings.base(),
            initial_quote_amount: holdings.initial_quote(),
            current_quote_amount: holdings.quote(),
            initial_sum_amount,
            current_sum_amount,
            profit,
            profit_margin,
            cagr,
            warnings,
            filled_orders: count(OrderState::Filled),
            canceled_orders: count(OrderState::Canceled),
            open_orders: count(OrderState::Open),
            orders: orders.to_vec(),
            prices: prices.to_vec(),
            strategy: strategy.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Time of the first candle.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.prices.first().map(Candle::timestamp)
    }

    /// Time of the last candle.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.prices.last().map(Candle::timestamp)
    }
}

/// Compound annual growth rate, in percent.
///
/// Fails with [`Error::ZeroDuration`] when `start == end` and [`Error::ZeroInitialValue`] when
/// `initial` is zero, instead of returning an infinite or NaN rate.
pub fn calculate_cagr(start: DateTime<Utc>, end: DateTime<Utc>, initial: f64, current: f64) -> Result<f64> {
    let seconds = (end - start).num_milliseconds() as f64 / 1_000.0;
    if seconds == 0.0 {
        return Err(MetricWarning::ZeroDuration.into());
    }
    if initial == 0.0 {
        return Err(MetricWarning::ZeroInitialValue.into());
    }
    let years = seconds / 86_400.0 / DAYS_PER_YEAR;
    Ok(((current / initial).powf(1.0 / years) - 1.0) * 100.0)
}

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}%"))
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} on {} ===", self.strategy, self.pair)?;
        writeln!(f, "Amount per order: {:.2} {}", self.amount_per_order, self.quote_coin)?;
        writeln!(
            f,
            "Initial: {:.8} {} + {:.2} {} = {:.2} {}",
            self.initial_base_amount,
            self.base_coin,
            self.initial_quote_amount,
            self.quote_coin,
            self.initial_sum_amount,
            self.quote_coin
        )?;
        writeln!(
            f,
            "Current: {:.8} {} + {:.2} {} = {:.2} {}",
            self.current_base_amount,
            self.base_coin,
            self.current_quote_amount,
            self.quote_coin,
            self.current_sum_amount,
            self.quote_coin
        )?;
        writeln!(f, "Profit: {:.2} {}", self.profit, self.quote_coin)?;
        writeln!(f, "Profit Margin: {}", metric(self.profit_margin))?;
        writeln!(f, "CAGR: {}", metric(self.cagr))?;
        write!(
            f,
            "Orders: {} filled, {} canceled, {} open",
            self.filled_orders, self.canceled_orders, self.open_orders
        )
    }
}

#[cfg(test)]
use crate::config::BacktestOptions;
#[cfg(test)]
use crate::engine::CandleBuilder;
#[cfg(test)]
use chrono::Duration;

#[cfg(test)]
fn candle(open: f64, at: DateTime<Utc>) -> Candle {
    CandleBuilder::builder()
        .open(open)
        .high(open)
        .low(open)
        .close(open)
        .timestamp(at)
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn single_candle_is_degenerate() {
    let holdings = Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, 0.0, 1.0)).unwrap();
    let prices = [candle(100.0, DateTime::default())];
    let portfolio = Portfolio::new(&holdings, &[], &prices, "idle").unwrap();

    assert_eq!(portfolio.initial_sum_amount, 100.0);
    assert_eq!(portfolio.current_sum_amount, 100.0);
    assert_eq!(portfolio.profit, 0.0);
    assert_eq!(portfolio.profit_margin, Some(0.0));
    assert_eq!(portfolio.cagr, None);
    assert_eq!(portfolio.warnings, vec![MetricWarning::ZeroDuration]);
    assert_eq!((portfolio.base_coin.as_str(), portfolio.quote_coin.as_str()), ("BTC", "USDT"));
}

#[cfg(test)]
#[test]
fn zero_initial_value() {
    let holdings = Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, 0.0, 0.0)).unwrap();
    let start = DateTime::default();
    let prices = [candle(100.0, start), candle(100.0, start + Duration::days(365))];
    let portfolio = Portfolio::new(&holdings, &[], &prices, "idle").unwrap();

    assert_eq!(portfolio.profit_margin, None);
    assert_eq!(portfolio.cagr, None);
    assert_eq!(portfolio.warnings, vec![MetricWarning::ZeroInitialValue]);
}

#[cfg(test)]
#[test]
fn values_priced_at_first_and_last_open() {
    let holdings = Holdings::new(&BacktestOptions::new("ETH/USDT", 10.0, 50.0, 2.0)).unwrap();
    let start = DateTime::default();
    let prices = [
        candle(100.0, start),
        candle(300.0, start + Duration::days(1)),
        candle(200.0, start + Duration::days(2)),
    ];
    let portfolio = Portfolio::new(&holdings, &[], &prices, "idle").unwrap();

    assert_eq!(portfolio.initial_sum_amount, 250.0);
    assert_eq!(portfolio.current_sum_amount, 450.0);
    assert_eq!(portfolio.profit, 200.0);
    assert_eq!(portfolio.profit_margin, Some(80.0));
    assert!(portfolio.cagr.is_some_and(|c| c.is_finite() && c > 0.0));
    assert!(portfolio.warnings.is_empty());
}

#[cfg(test)]
#[test]
fn cagr_over_whole_years() {
    let start = DateTime::default();
    let end = start + Duration::milliseconds((2.0 * DAYS_PER_YEAR * 86_400_000.0) as i64);
    let cagr = calculate_cagr(start, end, 100.0, 121.0).unwrap();
    assert!((cagr - 10.0).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn cagr_degenerate_inputs() {
    let start = DateTime::default();
    assert!(matches!(calculate_cagr(start, start, 100.0, 110.0), Err(Error::ZeroDuration)));
    let end = start + Duration::days(10);
    assert!(matches!(calculate_cagr(start, end, 0.0, 110.0), Err(Error::ZeroInitialValue)));
}

#[cfg(test)]
#[test]
fn portfolio_json_layout() {
    let holdings = Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, 0.0, 1.0)).unwrap();
    let prices = [candle(100.0, DateTime::default())];
    let portfolio = Portfolio::new(&holdings, &[], &prices, "idle").unwrap();
    let json = serde_json::to_value(&portfolio).unwrap();

    assert_eq!(json["baseCoin"], "BTC");
    assert_eq!(json["amountPerOrder"], 10.0);
    assert_eq!(json["initialSumAmount"], 100.0);
    assert!(json["cagr"].is_null());
    assert_eq!(json["warnings"][0], "ZERO_DURATION");
    assert_eq!(json["prices"].as_array().unwrap().len(), 1);

    let back: Portfolio = serde_json::from_value(json).unwrap();
    assert_eq!(back, portfolio);
}

#[cfg(test)]
#[test]
fn display_summary() {
    let holdings = Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, 0.0, 1.0)).unwrap();
    let prices = [candle(100.0, DateTime::default())];
    let text = Portfolio::new(&holdings, &[], &prices, "idle").unwrap().to_string();
    assert!(text.starts_with("=== idle on BTC/USDT ==="));
    assert!(text.contains("CAGR: n/a"));
    assert!(text.contains("Profit Margin: 0.00%"));
}
