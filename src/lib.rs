//! # Replay BTS: bar-replay backtesting for take-profit / cancel orders
//!
//! **Replay BTS** replays historical OHLC candles through a trading strategy, one candle at a time,
//! and simulates the lifecycle of the orders it places along with the capital they move.
//!
//! Every order carries two price levels: a **take-profit** price that fills it and a **cancel**
//! price that abandons it. On each candle, open orders are checked against the candle's
//! `[low, high]` range first (cancellation wins when both levels are reached), then the strategy may
//! open one new order if the holdings cover it.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`Candle`** | Open, high, low and close prices of a single time period.                                     |
//! | **`Order`**  | A BUY or SELL with its reserved amount, take-profit and cancel prices.                        |
//! | **`OrderLedger`** | Every order ever opened, with its OPEN → CANCELED / FILLED lifecycle.                    |
//! | **`Holdings`** | Base and quote balances, reserved and released as orders open and close.                   |
//! | **`Backtest`** | The engine that replays the candles through a strategy.                                     |
//! | **`Strategy`** | Proposes at most one order intent per candle.                                               |
//! | **`Portfolio`** | Profit, margin and CAGR of a finished run, serializable as JSON.                           |
//! | **`Repository`** | Versioned storage of portfolios on a key/value store (Redis or in-memory).                |
//! | **`Optimizer`** | Sweeps strategy parameters in parallel.                                                    |
//!
//! ## Capital accounting
//! | Side     | On open                          | On fill                          | On cancel                     |
//! |----------|----------------------------------|----------------------------------|-------------------------------|
//! | **SELL** | `base -= amount / open`          | `quote += reserved × open`       | `base += reserved`            |
//! | **BUY**  | `quote -= amount`                | `base += reserved / open`        | `quote += reserved × open`    |
//!
//! ## Features
//! | Feature       | Default | Description                                                       |
//! |---------------|---------|-------------------------------------------------------------------|
//! | `optimizer`   | yes     | Parallel parameter sweeps with [`rayon`](https://crates.io/crates/rayon). |
//! | `redis`       | yes     | `RedisStore`, a Redis-backed result store.                        |
//! | `server`      | yes     | HTTP query surface over stored results, with `axum`.              |
//! | `download`    | yes     | Historical candles from the Binance public API.                   |
//!
//! ## Getting Started
//! ```rust
//! use std::sync::Arc;
//!
//! use replay_bts::prelude::*;
//! use chrono::{DateTime, Duration};
//!
//! let candles = [100.0, 102.0, 99.0, 104.0]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &open)| {
//!         CandleBuilder::builder()
//!             .open(open)
//!             .high(open + 3.0)
//!             .low(open - 3.0)
//!             .close(open + 1.0)
//!             .timestamp(DateTime::default() + Duration::hours(i as i64))
//!             .build()
//!     })
//!     .collect::<Result<Vec<_>>>()
//!     .unwrap();
//!
//! let options = BacktestOptions::new("BTC/USDT", 10.0, 1_000.0, 1.0);
//! let mut bts = Backtest::new(Arc::from_iter(candles), &options).unwrap();
//! let mut strategy = FixedGrid::new(1.0, 10.0).unwrap();
//! bts.run(&mut strategy).unwrap();
//!
//! let portfolio = bts.portfolio(strategy.name()).unwrap();
//! println!("{portfolio}");
//! assert_eq!(portfolio.orders.len(), 4);
//! ```
//!
//! ### Output:
//! ```bash
//! === fixed-grid on BTC/USDT ===
//! ...
//! ```
//!
//! ## Error Handling
//! Every fallible operation returns [`errors::Result`]. Errors cover:
//! - Invalid candles, options and strategy parameters.
//! - Malformed CSV files and API responses.
//! - Order lifecycle violations (an order leaving a terminal state).
//! - Store and transport failures.
#![warn(missing_docs)]

/// Core replay components: candles, orders, ledger, holdings and the backtest engine.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Run options and TOML run configuration.
pub mod config;

/// Order lifecycle events and their observers.
pub mod events;

/// Strategy interface and the bundled strategies.
pub mod strategy;

/// CSV candle ingestion.
pub mod data;

/// End-of-run report: profit, margin and CAGR.
pub mod portfolio;

/// Versioned result storage.
pub mod store;

/// Utility functions and helpers.
mod utils;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// HTTP query surface over stored results.
#[cfg(feature = "server")]
pub mod server;

/// Historical candles from the Binance public API.
#[cfg(feature = "download")]
pub mod download;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::config::*;
    pub use crate::data::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::portfolio::*;
    pub use crate::store::*;
    pub use crate::strategy::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Trait for performing percentage-based calculations.
///
/// This trait provides methods to add, subtract, and calculate percentages
/// for numeric types, enabling common financial calculations.
pub trait PercentCalculus<Rhs = Self> {
    /// Adds a percentage to the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to add (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value increased by the given percentage.
    fn addpercent(self, rhs: Rhs) -> Self;

    /// Subtracts a percentage from the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to subtract (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value decreased by the given percentage.
    fn subpercent(self, rhs: Rhs) -> Self;

    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Self) -> Self;
}

impl PercentCalculus for f64 {
    fn addpercent(self, percent: Self) -> Self {
        self.add(self.mul(percent.div(100.0)))
    }

    fn subpercent(self, percent: Self) -> Self {
        self.sub(self.mul(percent.div(100.0)))
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(110.0, 100.0.addpercent(10.0))
    }

    #[test]
    fn sub() {
        assert_eq!(90.0, 100.0.subpercent(10.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0))
    }
}
