//! Run configuration.
//!
//! [`BacktestOptions`] is what the engine needs; [`RunConfig`] is the TOML document the binary reads.
//!
//! ```toml
//! data = "data/BTCUSDT_1h.csv"
//! pair = "BTC/USDT"
//! amount_per_order = 10.0
//! initial_quote_amount = 100000.0
//! initial_base_amount = 100.0
//! redis_url = "redis://127.0.0.1:6380/3"
//!
//! [strategy]
//! kind = "step_alternating"
//! take_profit_offset = 10.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::strategy::StrategyConfig;

/// Capital settings of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestOptions {
    /// Traded pair, `BASE/QUOTE` (e.g. `BTC/USDT`).
    pub pair: String,
    /// Quote value committed by every order.
    pub amount_per_order: f64,
    /// Quote units held at the start.
    pub initial_quote_amount: f64,
    /// Base units held at the start.
    pub initial_base_amount: f64,
}

impl BacktestOptions {
    /// Creates options for `pair`.
    pub fn new(pair: impl ToString, amount_per_order: f64, initial_quote_amount: f64, initial_base_amount: f64) -> Self {
        Self {
            pair: pair.to_string(),
            amount_per_order,
            initial_quote_amount,
            initial_base_amount,
        }
    }

    /// Checks the pair format and the amounts.
    pub fn validate(&self) -> Result<()> {
        self.coins()?;
        if self.amount_per_order <= 0.0 || !self.amount_per_order.is_finite() {
            return Err(Error::NegZeroAmountPerOrder(self.amount_per_order));
        }
        if self.initial_quote_amount < 0.0 || !self.initial_quote_amount.is_finite() {
            return Err(Error::NegAmount("quote", self.initial_quote_amount));
        }
        if self.initial_base_amount < 0.0 || !self.initial_base_amount.is_finite() {
            return Err(Error::NegAmount("base", self.initial_base_amount));
        }
        Ok(())
    }

    /// Splits the pair into `(base, quote)` coin names.
    pub fn coins(&self) -> Result<(&str, &str)> {
        match self.pair.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('/') => {
                Ok((base, quote))
            }
            _ => Err(Error::InvalidPair(self.pair.clone())),
        }
    }
}

/// A full run: price file, capital and strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// CSV price file.
    pub data: PathBuf,
    /// Capital settings.
    #[serde(flatten)]
    pub options: BacktestOptions,
    /// Strategy selection and parameters.
    pub strategy: StrategyConfig,
    /// Where to persist results, if anywhere.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl RunConfig {
    /// Reads and validates a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }
}

impl std::str::FromStr for RunConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.options.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[test]
fn validate_options() {
    assert!(BacktestOptions::new("BTC/USDT", 10.0, 100_000.0, 100.0).validate().is_ok());
    assert!(BacktestOptions::new("BTC/USDT", 10.0, 0.0, 0.0).validate().is_ok());
    assert!(matches!(
        BacktestOptions::new("BTC/USDT", 0.0, 1.0, 1.0).validate(),
        Err(Error::NegZeroAmountPerOrder(_))
    ));
    assert!(matches!(
        BacktestOptions::new("BTC/USDT", 10.0, -1.0, 1.0).validate(),
        Err(Error::NegAmount("quote", _))
    ));
    assert!(matches!(
        BacktestOptions::new("BTC/USDT", 10.0, 1.0, f64::NAN).validate(),
        Err(Error::NegAmount("base", _))
    ));
}

#[cfg(test)]
#[test]
fn pair_coins() {
    let options = BacktestOptions::new("ETH/USDT", 10.0, 1.0, 1.0);
    assert_eq!(options.coins().unwrap(), ("ETH", "USDT"));
    for pair in ["BTCUSDT", "BTC/", "/USDT", "A/B/C"] {
        let options = BacktestOptions::new(pair, 10.0, 1.0, 1.0);
        assert!(matches!(options.coins(), Err(Error::InvalidPair(_))), "{pair}");
    }
}

#[cfg(test)]
#[test]
fn parse_run_config() {
    let config: RunConfig = r#"
        data = "prices.csv"
        pair = "BTC/USDT"
        amount_per_order = 10.0
        initial_quote_amount = 100000.0
        initial_base_amount = 100.0

        [strategy]
        kind = "fixed_grid"
        grid_percent = 2.0
    "#
    .parse()
    .unwrap();

    assert_eq!(config.data, PathBuf::from("prices.csv"));
    assert_eq!(config.options, BacktestOptions::new("BTC/USDT", 10.0, 100_000.0, 100.0));
    assert!(config.redis_url.is_none());
    assert!(matches!(config.strategy, StrategyConfig::FixedGrid { grid_percent, .. } if grid_percent == 2.0));
}

#[cfg(test)]
#[test]
fn parse_run_config_rejects_bad_options() {
    let result = r#"
        data = "prices.csv"
        pair = "BTCUSDT"
        amount_per_order = 10.0
        initial_quote_amount = 1.0
        initial_base_amount = 1.0

        [strategy]
        kind = "step_alternating"
    "#
    .parse::<RunConfig>();
    assert!(matches!(result, Err(Error::InvalidPair(_))));
}
