use crate::engine::OrderState;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the replay engine and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The candle data provided is empty. Replaying requires at least one candle.
    #[error("Candle data is empty: replaying requires at least one candle")]
    CandleDataEmpty,

    /// A candle price is not finite or breaks `low <= open, close <= high`.
    #[error("Invalid candle (open: {open}, high: {high}, low: {low}, close: {close})")]
    InvalidCandle {
        /// Open price.
        open: f64,
        /// High price.
        high: f64,
        /// Low price.
        low: f64,
        /// Close price.
        close: f64,
    },

    /// A missing candle field when building it.
    #[error("Missing candle field: {0}")]
    MissingField(&'static str),

    /// An order left its open state already and cannot transition again.
    /// This is a logic bug in the caller, never a market condition.
    #[error("Order #{id} is already {state}, it cannot become {attempted}")]
    InvalidState {
        /// Ledger id of the order.
        id: usize,
        /// Current (terminal) state.
        state: OrderState,
        /// The rejected target state.
        attempted: OrderState,
    },

    /// The order was not found in the ledger.
    #[error("Order #{0} not found")]
    OrderNotFound(usize),

    /// The amount per order must be strictly positive.
    #[error("Amount per order must be positive (got: {0})")]
    NegZeroAmountPerOrder(f64),

    /// An initial holding is negative or not finite.
    #[error("Initial {0} amount must be positive or zero (got: {1})")]
    NegAmount(&'static str, f64),

    /// The pair is not formatted as `BASE/QUOTE`.
    #[error("Invalid pair `{0}`: expected BASE/QUOTE (e.g. BTC/USDT)")]
    InvalidPair(String),

    /// The CSV header does not start with the required columns.
    #[error("Invalid CSV header: expected columns `timestamp, open, high, low, close`, found `{0}`")]
    CsvHeader(String),

    /// A CSV row is shorter than the required columns.
    #[error("Missing `{column}` column at line {line}")]
    MissingColumn {
        /// Name of the missing column.
        column: &'static str,
        /// Line in the source file.
        line: u64,
    },

    /// A CSV field is not a valid number.
    #[error("Invalid number `{value}` in column `{column}` at line {line}")]
    InvalidNumber {
        /// Name of the column.
        column: &'static str,
        /// Raw field value.
        value: String,
        /// Line in the source file.
        line: u64,
    },

    /// An epoch timestamp cannot be represented.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    /// The series spans no time, the CAGR is undefined.
    #[error("CAGR is undefined: the candle series spans zero time")]
    ZeroDuration,

    /// The initial holdings are worth nothing, relative metrics are undefined.
    #[error("Relative metrics are undefined: the initial value is zero")]
    ZeroInitialValue,

    /// A strategy parameter is invalid.
    #[error("Invalid strategy parameter: {0}")]
    InvalidParameter(String),

    /// The stored result version was not found.
    #[error("Result `{id}` version {version} not found")]
    VersionNotFound {
        /// Result id.
        id: String,
        /// Requested version.
        version: u64,
    },

    /// The market data request failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// A lock was poisoned.
    #[error("Mutex error: {0}")]
    Mutex(String),

    /// Custom error message.
    #[error("{0}")]
    Msg(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV reading/writing error occurred.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// TOML configuration error occurred.
    #[error("Config error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Redis error occurred.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// HTTP error occurred.
    #[cfg(feature = "download")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}
