//! Historical candles from the Binance public API.
//!
//! Windows of 100 candles are requested backward from the end of the range, each one ending
//! a millisecond before the first candle of the previous one, until the start is passed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::data::save_csv;
use crate::engine::{Candle, CandleBuilder};
use crate::errors::{Error, Result};

/// Default API root.
pub const BINANCE_API: &str = "https://www.binance.com/api/v3";

/// Candles requested per window.
pub const WINDOW_LIMIT: usize = 100;

/// Candle interval supported by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// 1 minute.
    OneMinute,
    /// 3 minutes.
    ThreeMinutes,
    /// 5 minutes.
    FiveMinutes,
    /// 15 minutes.
    FifteenMinutes,
    /// 30 minutes.
    ThirtyMinutes,
    /// 1 hour.
    OneHour,
}

impl Interval {
    /// Returns the API code of the interval.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "3m" => Ok(Self::ThreeMinutes),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            _ => Err(Error::InvalidParameter(format!(
                "unsupported interval `{s}` (expected one of 1m, 3m, 5m, 15m, 30m, 1h)"
            ))),
        }
    }
}

/// Turns `BTC/USDT` into the exchange symbol `BTCUSDT`.
pub fn market_symbol(pair: &str) -> Result<String> {
    match pair.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('/') => {
            Ok(format!("{}{}", base.to_uppercase(), quote.to_uppercase()))
        }
        _ => Err(Error::InvalidPair(pair.to_string())),
    }
}

/// Parses a `DD/MM/YYYY` date as midnight UTC.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .map_err(|e| Error::InvalidParameter(format!("invalid date `{s}` (expected DD/MM/YYYY): {e}")))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidParameter(format!("invalid date `{s}`")))
}

/// Parses a kline response: an array of `[openTime, "open", "high", "low", "close", ...]`.
pub fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    rows.iter().map(|row| parse_kline(row)).collect()
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    let malformed = || Error::Download(format!("malformed kline: {row:?}"));
    let price = |i: usize| -> Result<f64> {
        let value = row.get(i).ok_or_else(malformed)?;
        match value {
            serde_json::Value::String(s) => s.parse().map_err(|_| malformed()),
            serde_json::Value::Number(n) => n.as_f64().ok_or_else(malformed),
            _ => Err(malformed()),
        }
    };

    let open_time = row.first().and_then(serde_json::Value::as_i64).ok_or_else(malformed)?;
    let timestamp = DateTime::from_timestamp_millis(open_time).ok_or_else(malformed)?;

    CandleBuilder::builder()
        .open(price(1)?)
        .high(price(2)?)
        .low(price(3)?)
        .close(price(4)?)
        .timestamp(timestamp)
        .build()
}

/// Walks backward from `to` with `fetch_window(end)` until `from` is passed or a window comes back empty.
///
/// Returns the candles of `[from, to]`, oldest first.
pub fn paginate<F>(from: DateTime<Utc>, to: DateTime<Utc>, mut fetch_window: F) -> Result<Vec<Candle>>
where
    F: FnMut(DateTime<Utc>) -> Result<Vec<Candle>>,
{
    let mut windows = Vec::new();
    let mut cursor = to;
    while cursor > from {
        let window = fetch_window(cursor)?;
        let Some(first) = window.first() else {
            break;
        };
        let next = first.timestamp() - chrono::Duration::milliseconds(1);
        tracing::debug!(%next, candles = window.len(), "next cursor");
        windows.push(window);
        if next >= cursor {
            break;
        }
        cursor = next;
    }

    Ok(windows
        .into_iter()
        .rev()
        .flatten()
        .filter(|c| c.timestamp() >= from && c.timestamp() <= to)
        .collect())
}

/// Blocking Binance kline client.
pub struct BinanceDownloader {
    client: Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceDownloader {
    /// Creates a client for the public API.
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: BINANCE_API.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Targets another API root.
    pub fn with_base_url(mut self, base_url: impl ToString) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Fetches the window of candles ending at `end`.
    ///
    /// Gateway errors (502, 503, 504) are retried up to 3 times.
    pub fn fetch_window(&self, symbol: &str, interval: Interval, end: DateTime<Utc>) -> Result<Vec<Candle>> {
        let url = format!("{}/uiKlines", self.base_url);
        let query = [
            ("endTime", end.timestamp_millis().to_string()),
            ("limit", WINDOW_LIMIT.to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
        ];

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }

            let response = self.client.get(&url).query(&query).send()?;
            let status = response.status();
            if matches!(
                status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ) {
                tracing::warn!(%status, attempt, symbol, "kline request failed, retrying");
                continue;
            }
            if !status.is_success() {
                return Err(Error::Download(format!("{symbol} {interval}: HTTP {status}")));
            }
            return parse_klines(&response.text()?);
        }

        Err(Error::Download(format!(
            "{symbol} {interval}: gateway still failing after {} retries",
            self.max_retries
        )))
    }

    /// Fetches every candle of `[from, to]`, oldest first.
    pub fn fetch(&self, pair: &str, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Candle>> {
        let symbol = market_symbol(pair)?;
        let candles = paginate(from, to, |end| self.fetch_window(&symbol, interval, end))?;
        tracing::info!(%symbol, %interval, candles = candles.len(), "candles downloaded");
        Ok(candles)
    }

    /// Fetches `[from, to]` and writes it as CSV under `out_dir`.
    ///
    /// ### Returns
    /// The path of the written file, e.g. `BTCUSDT_1h_20230101_20230201.csv`.
    pub fn download(
        &self,
        pair: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let candles = self.fetch(pair, interval, from, to)?;
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(file_name(&market_symbol(pair)?, interval, from, to));
        save_csv(&path, &candles)?;
        Ok(path)
    }
}

fn file_name(symbol: &str, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!("{symbol}_{interval}_{}_{}.csv", from.format("%Y%m%d"), to.format("%Y%m%d"))
}

#[cfg(test)]
fn candle_at(millis: i64) -> Candle {
    CandleBuilder::builder()
        .open(1.0)
        .high(1.0)
        .low(1.0)
        .close(1.0)
        .timestamp(DateTime::from_timestamp_millis(millis).unwrap())
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn intervals() {
    for code in ["1m", "3m", "5m", "15m", "30m", "1h"] {
        assert_eq!(code.parse::<Interval>().unwrap().to_string(), code);
    }
    assert!(matches!("4h".parse::<Interval>(), Err(Error::InvalidParameter(_))));
}

#[cfg(test)]
#[test]
fn symbols_and_dates() {
    assert_eq!(market_symbol("btc/usdt").unwrap(), "BTCUSDT");
    assert!(matches!(market_symbol("BTCUSDT"), Err(Error::InvalidPair(_))));

    let date = parse_date("02/01/2023").unwrap();
    assert_eq!(date.to_rfc3339(), "2023-01-02T00:00:00+00:00");
    assert!(parse_date("2023-01-02").is_err());
}

#[cfg(test)]
#[test]
fn parse_kline_rows() {
    let body = r#"[
        [1672531200000, "16541.77", "16545.70", "16508.39", "16529.67", "4364.8", 1672534799999],
        [1672534800000, "16529.59", "16556.80", "16525.78", "16551.47", "3590.0", 1672538399999]
    ]"#;
    let candles = parse_klines(body).unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].timestamp().timestamp(), 1_672_531_200);
    assert_eq!(candles[0].open(), 16541.77);
    assert_eq!(candles[1].close(), 16551.47);

    assert!(matches!(parse_klines(r#"[[1672531200000, "x", "1", "1", "1"]]"#), Err(Error::Download(_))));
    assert!(matches!(parse_klines("{}"), Err(Error::JsonError(_))));
}

#[cfg(test)]
#[test]
fn paginate_walks_backward() {
    // one candle per second over [0, 250s], windows of 100
    let series: Vec<Candle> = (0..=250).map(|s| candle_at(s * 1_000)).collect();
    let mut requests = Vec::new();

    let from = DateTime::from_timestamp(20, 0).unwrap();
    let to = DateTime::from_timestamp(250, 0).unwrap();
    let candles = paginate(from, to, |end| {
        requests.push(end.timestamp_millis());
        let upto: Vec<Candle> = series.iter().filter(|c| c.timestamp() <= end).cloned().collect();
        let start = upto.len().saturating_sub(WINDOW_LIMIT);
        Ok(upto[start..].to_vec())
    })
    .unwrap();

    assert_eq!(requests, vec![250_000, 150_999, 50_999]);
    assert_eq!(candles.len(), 231);
    assert_eq!(candles.first().unwrap().timestamp(), from);
    assert_eq!(candles.last().unwrap().timestamp(), to);
    assert!(candles.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));
}

#[cfg(test)]
#[test]
fn paginate_stops_on_empty_window() {
    let from = DateTime::from_timestamp(0, 0).unwrap();
    let to = DateTime::from_timestamp(1_000, 0).unwrap();
    let mut calls = 0;
    let candles = paginate(from, to, |_| {
        calls += 1;
        Ok(Vec::new())
    })
    .unwrap();
    assert!(candles.is_empty());
    assert_eq!(calls, 1);
}

#[cfg(test)]
#[test]
fn paginate_propagates_errors() {
    let from = DateTime::from_timestamp(0, 0).unwrap();
    let to = DateTime::from_timestamp(1_000, 0).unwrap();
    let result = paginate(from, to, |_| Err(Error::Download("boom".to_string())));
    assert!(matches!(result, Err(Error::Download(_))));
}

#[cfg(test)]
#[test]
fn csv_file_name() {
    let from = parse_date("01/01/2023").unwrap();
    let to = parse_date("01/02/2023").unwrap();
    assert_eq!(
        file_name("BTCUSDT", Interval::OneHour, from, to),
        "BTCUSDT_1h_20230101_20230201.csv"
    );
}
