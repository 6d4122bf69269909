//! Trading strategies.
//!
//! A strategy looks at one candle at a time and may propose a new order. It never touches the
//! holdings or the ledger; the engine decides whether the proposal can be afforded.
//!
//! | Strategy | Signal |
//! |----------|--------|
//! | [`MaCrossover`] | open price against a simple moving average of the close |
//! | [`Oscillator`] | the crossover, filtered by the RSI of the close |
//! | [`FixedGrid`] | buy then sell on alternate candles, levels in percent |
//! | [`StepAlternating`] | buy then sell on alternate candles, levels in quote units |

mod fixed_grid;
mod ma_crossover;
mod oscillator;
mod step_alternating;

pub use fixed_grid::*;
pub use ma_crossover::*;
pub use oscillator::*;
pub use step_alternating::*;

use serde::{Deserialize, Serialize};

use crate::engine::{Candle, OrderIntent};
use crate::errors::{Error, Result};

/// Decision interface polled once per candle by the replay engine.
pub trait Strategy {
    /// Returns a new order intent for this candle, if any.
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent>;

    /// Returns the strategy name, used in stored result ids.
    fn name(&self) -> &str;
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        (**self).decide(candle)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A named closure acting as a strategy.
///
/// ### Example
/// ```rust
/// use replay_bts::prelude::*;
///
/// let mut first = true;
/// let strategy = FnStrategy::new("once", move |candle: &Candle| {
///     let open = candle.open();
///     std::mem::take(&mut first).then(|| (OrderSide::Sell, open.addpercent(5.0), open.subpercent(10.0)).into())
/// });
/// assert_eq!(strategy.name(), "once");
/// ```
pub struct FnStrategy<F> {
    name: String,
    decide: F,
}

impl<F> FnStrategy<F>
where
    F: FnMut(&Candle) -> Option<OrderIntent>,
{
    /// Wraps `decide` under `name`.
    pub fn new(name: impl ToString, decide: F) -> Self {
        Self {
            name: name.to_string(),
            decide,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(&Candle) -> Option<OrderIntent>,
{
    fn decide(&mut self, candle: &Candle) -> Option<OrderIntent> {
        (self.decide)(candle)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Strategy selection, as written in a run config.
///
/// Missing parameters take the defaults of each strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// See [`MaCrossover`].
    MaCrossover {
        /// Moving average window.
        #[serde(default = "defaults::ma_period")]
        period: usize,
        /// Take-profit distance from the open, in percent.
        #[serde(default = "defaults::take_profit_percent")]
        take_profit_percent: f64,
        /// Cancel distance from the open, in percent.
        #[serde(default = "defaults::cancel_percent")]
        cancel_percent: f64,
    },
    /// See [`Oscillator`].
    Oscillator {
        /// Moving average window.
        #[serde(default = "defaults::ma_period")]
        period: usize,
        /// RSI window.
        #[serde(default = "defaults::rsi_period")]
        rsi_period: usize,
        /// Sells require the RSI below this level.
        #[serde(default = "defaults::overbought")]
        overbought: f64,
        /// Buys require the RSI above this level.
        #[serde(default = "defaults::oversold")]
        oversold: f64,
        /// Take-profit distance from the open, in percent.
        #[serde(default = "defaults::take_profit_percent")]
        take_profit_percent: f64,
        /// Cancel distance from the open, in percent.
        #[serde(default = "defaults::cancel_percent")]
        cancel_percent: f64,
    },
    /// See [`FixedGrid`].
    FixedGrid {
        /// Take-profit distance from the open, in percent.
        #[serde(default = "defaults::grid_percent")]
        grid_percent: f64,
        /// Cancel distance from the open, in percent.
        #[serde(default = "defaults::cancel_percent")]
        cancel_percent: f64,
    },
    /// See [`StepAlternating`].
    StepAlternating {
        /// Take-profit distance from the open, in quote units.
        #[serde(default = "defaults::take_profit_offset")]
        take_profit_offset: f64,
        /// Cancel distance from the open, in percent.
        #[serde(default = "defaults::cancel_percent")]
        cancel_percent: f64,
    },
}

pub(crate) mod defaults {
    pub fn ma_period() -> usize {
        100
    }

    pub fn rsi_period() -> usize {
        14
    }

    pub fn overbought() -> f64 {
        70.0
    }

    pub fn oversold() -> f64 {
        30.0
    }

    pub fn take_profit_percent() -> f64 {
        5.0
    }

    pub fn cancel_percent() -> f64 {
        10.0
    }

    pub fn grid_percent() -> f64 {
        1.0
    }

    pub fn take_profit_offset() -> f64 {
        10.0
    }
}

impl StrategyConfig {
    /// Builds the configured strategy.
    pub fn build(&self) -> Result<Box<dyn Strategy + Send>> {
        Ok(match *self {
            Self::MaCrossover {
                period,
                take_profit_percent,
                cancel_percent,
            } => Box::new(MaCrossover::new(period, take_profit_percent, cancel_percent)?),
            Self::Oscillator {
                period,
                rsi_period,
                overbought,
                oversold,
                take_profit_percent,
                cancel_percent,
            } => Box::new(
                Oscillator::new(period, rsi_period, take_profit_percent, cancel_percent)?
                    .with_bounds(oversold, overbought)?,
            ),
            Self::FixedGrid {
                grid_percent,
                cancel_percent,
            } => Box::new(FixedGrid::new(grid_percent, cancel_percent)?),
            Self::StepAlternating {
                take_profit_offset,
                cancel_percent,
            } => Box::new(StepAlternating::new(take_profit_offset, cancel_percent)?),
        })
    }
}

pub(crate) fn check_percent(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 || value >= 100.0 {
        return Err(Error::InvalidParameter(format!(
            "{name} must be within ]0, 100[ (got: {value})"
        )));
    }
    Ok(value)
}

pub(crate) fn check_period(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Error::InvalidParameter(format!("{name} must be at least 1")));
    }
    Ok(value)
}

/// Alternates buy and sell, starting with a buy on the first candle.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Alternation {
    step: u64,
}

impl Alternation {
    pub(crate) fn next_is_buy(&mut self) -> bool {
        self.step += 1;
        self.step % 2 == 1
    }
}

#[cfg(test)]
pub(crate) fn candle_at(open: f64, close: f64) -> Candle {
    crate::engine::CandleBuilder::builder()
        .open(open)
        .high(open.max(close) + 1.0)
        .low(open.min(close) - 1.0)
        .close(close)
        .timestamp(chrono::DateTime::default())
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn build_every_kind() {
    let configs = [
        ("ma_crossover", "ma-crossover"),
        ("oscillator", "oscillator"),
        ("fixed_grid", "fixed-grid"),
        ("step_alternating", "step-alternating"),
    ];
    for (kind, name) in configs {
        let config: StrategyConfig = toml::from_str(&format!("kind = \"{kind}\"")).unwrap();
        let strategy = config.build().unwrap();
        assert_eq!(strategy.name(), name);
    }
}

#[cfg(test)]
#[test]
fn build_rejects_bad_parameters() {
    let config = StrategyConfig::MaCrossover {
        period: 0,
        take_profit_percent: 5.0,
        cancel_percent: 10.0,
    };
    assert!(matches!(config.build(), Err(Error::InvalidParameter(_))));

    let config = StrategyConfig::FixedGrid {
        grid_percent: -1.0,
        cancel_percent: 10.0,
    };
    assert!(matches!(config.build(), Err(Error::InvalidParameter(_))));
}

#[cfg(test)]
#[test]
fn fn_strategy_forwards_calls() {
    use crate::engine::OrderSide;

    let mut calls = 0;
    let mut strategy = FnStrategy::new("count", |c: &Candle| {
        calls += 1;
        Some((OrderSide::Buy, c.open() - 1.0, c.open() + 1.0).into())
    });
    let intent = strategy.decide(&candle_at(100.0, 100.0)).unwrap();
    assert_eq!(intent.side, OrderSide::Buy);
    assert_eq!(intent.take_profit_price, 99.0);
    drop(strategy);
    assert_eq!(calls, 1);
}

#[cfg(test)]
#[test]
fn alternation_starts_with_buy() {
    let mut alt = Alternation::default();
    let sides: Vec<bool> = (0..4).map(|_| alt.next_is_buy()).collect();
    assert_eq!(sides, [true, false, true, false]);
}
