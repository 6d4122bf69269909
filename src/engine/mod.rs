//! Replay engine components.
//!
//! - `Candle`: one OHLC bar, the unit the engine steps over.
//! - `Order`: an order and its `OPEN -> CANCELED | FILLED` lifecycle.
//! - `OrderLedger`: every order of a run, never pruned.
//! - `Holdings`: base and quote balances with the reservation and settlement rules.
//! - `Backtest`: the resolve-then-open replay loop.

mod bts;
mod candle;
mod holdings;
mod ledger;
mod order;

pub use bts::*;
pub use candle::*;
pub use holdings::*;
pub use ledger::*;
pub use order::*;
