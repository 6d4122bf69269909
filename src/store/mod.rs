//! Versioned result storage.
//!
//! Results live in an opaque key/value store under this layout:
//!
//! | Key | Value |
//! |-----|-------|
//! | `data:version:{id}` | latest version of `id`, incremented on every save |
//! | `data:{id}_{version}` | the [`Portfolio`] JSON of that version |
//!
//! with `id = {base}_{quote}_{strategy}_{startEpoch}_{endEpoch}` and the strategy name
//! lower-cased, every non-alphanumeric character replaced with `-`.

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::portfolio::Portfolio;
use crate::utils::sanitize;

const VERSION_PREFIX: &str = "data:version:";
const DATA_PREFIX: &str = "data:";

/// Minimal key/value operations the repository needs.
pub trait ResultStore: Send + Sync {
    /// Returns the value of `key`, if set.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets `key` to `value`, without expiry.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Increments the integer at `counter` (missing counts as 0) and stores `value` at
    /// `{value_prefix}{new count}`, as one atomic step. Returns the new count.
    ///
    /// Either both writes land or neither does.
    fn push_version(&self, counter: &str, value_prefix: &str, value: &str) -> Result<u64>;

    /// Returns every key starting with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries.lock().map_err(|e| Error::Mutex(e.to_string()))
    }
}

impl ResultStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn push_version(&self, counter: &str, value_prefix: &str, value: &str) -> Result<u64> {
        let mut entries = self.entries()?;
        let current = match entries.get(counter) {
            Some(count) => count
                .parse::<u64>()
                .map_err(|_| Error::Msg(format!("value of `{counter}` is not an integer")))?,
            None => 0,
        };
        let next = current + 1;
        entries.insert(format!("{value_prefix}{next}"), value.to_string());
        entries.insert(counter.to_string(), next.to_string());
        Ok(next)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Where a saved result landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVersion {
    /// Result id.
    pub id: String,
    /// Version assigned by this save.
    pub version: u64,
}

/// One stored result id, as listed by the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    /// Result id.
    pub id: String,
    /// Base coin.
    pub base_coin: String,
    /// Quote coin.
    pub quote_coin: String,
    /// Sanitized strategy name.
    pub strategy_name: String,
    /// Time of the first candle.
    pub start_date: DateTime<Utc>,
    /// Time of the last candle.
    pub end_date: DateTime<Utc>,
    /// Latest version.
    pub current_version: u64,
}

impl StoredKey {
    fn parse(id: &str, current_version: u64) -> Option<Self> {
        let mut tail = id.rsplitn(3, '_');
        let end = tail.next()?.parse::<i64>().ok()?;
        let start = tail.next()?.parse::<i64>().ok()?;
        let mut head = tail.next()?.splitn(3, '_');
        let (base, quote, strategy) = (head.next()?, head.next()?, head.next()?);
        Some(Self {
            id: id.to_string(),
            base_coin: base.to_string(),
            quote_coin: quote.to_string(),
            strategy_name: strategy.to_string(),
            start_date: DateTime::from_timestamp(start, 0)?,
            end_date: DateTime::from_timestamp(end, 0)?,
            current_version,
        })
    }
}

/// Returns the storage id of a result.
pub fn result_id(portfolio: &Portfolio) -> Result<String> {
    let start = portfolio.start().ok_or(Error::CandleDataEmpty)?;
    let end = portfolio.end().ok_or(Error::CandleDataEmpty)?;
    Ok(format!(
        "{}_{}_{}_{}_{}",
        portfolio.base_coin,
        portfolio.quote_coin,
        sanitize(&portfolio.strategy),
        start.timestamp(),
        end.timestamp()
    ))
}

/// Versioned results on top of a [`ResultStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn ResultStore>,
}

impl Repository {
    /// Wraps `store`.
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Saves `portfolio` as a new version of its id.
    ///
    /// The payload is serialized before anything is written, and the counter moves together with
    /// the payload write. Previous versions are never overwritten.
    pub fn save(&self, portfolio: &Portfolio) -> Result<StoredVersion> {
        let id = result_id(portfolio)?;
        let payload = serde_json::to_string(portfolio)?;

        let version = self.store.push_version(
            &format!("{VERSION_PREFIX}{id}"),
            &format!("{DATA_PREFIX}{id}_"),
            &payload,
        )?;

        tracing::info!(%id, version, "result stored");
        Ok(StoredVersion { id, version })
    }

    /// Lists every stored id with its latest version, sorted by id.
    pub fn list(&self) -> Result<Vec<StoredKey>> {
        let mut keys = Vec::new();
        for key in self.store.keys(VERSION_PREFIX)? {
            let Some(id) = key.strip_prefix(VERSION_PREFIX) else {
                continue;
            };
            let Some(version) = self.store.get(&key)?.and_then(|v| v.parse::<u64>().ok()) else {
                tracing::warn!(%key, "skipping version key without an integer value");
                continue;
            };
            match StoredKey::parse(id, version) {
                Some(stored) => keys.push(stored),
                None => tracing::warn!(%key, "skipping malformed result id"),
            }
        }
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(keys)
    }

    /// Returns the stored JSON of `id` at `version`, verbatim.
    pub fn fetch_raw(&self, id: &str, version: u64) -> Result<String> {
        self.store
            .get(&format!("{DATA_PREFIX}{id}_{version}"))?
            .ok_or_else(|| Error::VersionNotFound {
                id: id.to_string(),
                version,
            })
    }

    /// Returns the result of `id` at `version`.
    pub fn fetch(&self, id: &str, version: u64) -> Result<Portfolio> {
        let raw = self.fetch_raw(id, version)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
pub(crate) fn sample_portfolio(strategy: &str) -> Portfolio {
    use crate::config::BacktestOptions;
    use crate::engine::{CandleBuilder, Holdings};

    let candle = |open: f64, secs: i64| {
        CandleBuilder::builder()
            .open(open)
            .high(open + 1.0)
            .low(open - 1.0)
            .close(open)
            .timestamp(DateTime::from_timestamp(secs, 0).unwrap())
            .build()
            .unwrap()
    };
    let holdings = Holdings::new(&BacktestOptions::new("BTC/USDT", 10.0, 100.0, 1.0)).unwrap();
    let prices = [candle(100.0, 1_600_000_000), candle(110.0, 1_600_003_600)];
    Portfolio::new(&holdings, &[], &prices, strategy).unwrap()
}

#[cfg(test)]
#[test]
fn id_layout() {
    let portfolio = sample_portfolio("Fixed Grid");
    assert_eq!(result_id(&portfolio).unwrap(), "BTC_USDT_fixed-grid_1600000000_1600003600");
}

#[cfg(test)]
#[test]
fn versions_are_monotonic() {
    let store = Arc::new(MemoryStore::new());
    let repository = Repository::new(store.clone());
    let portfolio = sample_portfolio("Fixed Grid");

    let first = repository.save(&portfolio).unwrap();
    let second = repository.save(&portfolio).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!((first.version, second.version), (1, 2));

    assert!(store.get(&format!("data:{}_1", first.id)).unwrap().is_some());
    assert_eq!(store.get(&format!("data:version:{}", first.id)).unwrap().as_deref(), Some("2"));
    assert_eq!(repository.fetch(&first.id, 1).unwrap(), portfolio);
    assert_eq!(repository.fetch(&first.id, 2).unwrap(), portfolio);
}

#[cfg(test)]
#[test]
fn reads_are_byte_identical() {
    let repository = Repository::new(Arc::new(MemoryStore::new()));
    let stored = repository.save(&sample_portfolio("idle")).unwrap();

    let a = repository.fetch_raw(&stored.id, stored.version).unwrap();
    let b = repository.fetch_raw(&stored.id, stored.version).unwrap();
    assert_eq!(a, b);
}

#[cfg(test)]
#[test]
fn missing_version() {
    let repository = Repository::new(Arc::new(MemoryStore::new()));
    let stored = repository.save(&sample_portfolio("idle")).unwrap();
    assert!(matches!(
        repository.fetch(&stored.id, 2),
        Err(Error::VersionNotFound { version: 2, .. })
    ));
}

#[cfg(test)]
#[test]
fn list_keys() {
    let store = Arc::new(MemoryStore::new());
    let repository = Repository::new(store.clone());
    repository.save(&sample_portfolio("step alternating")).unwrap();
    repository.save(&sample_portfolio("fixed grid")).unwrap();
    repository.save(&sample_portfolio("fixed grid")).unwrap();
    store.set("data:version:garbage", "1").unwrap();

    let keys = repository.list().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].strategy_name, "fixed-grid");
    assert_eq!(keys[0].current_version, 2);
    assert_eq!(keys[0].base_coin, "BTC");
    assert_eq!(keys[0].quote_coin, "USDT");
    assert_eq!(keys[0].start_date.timestamp(), 1_600_000_000);
    assert_eq!(keys[1].strategy_name, "step-alternating");
    assert_eq!(keys[1].current_version, 1);
}

#[cfg(test)]
#[test]
fn memory_store_push_version() {
    let store = MemoryStore::new();
    assert_eq!(store.push_version("count", "value_", "a").unwrap(), 1);
    assert_eq!(store.push_version("count", "value_", "b").unwrap(), 2);
    assert_eq!(store.get("value_1").unwrap().as_deref(), Some("a"));
    assert_eq!(store.get("value_2").unwrap().as_deref(), Some("b"));
    assert_eq!(store.get("count").unwrap().as_deref(), Some("2"));

    store.set("broken", "abc").unwrap();
    assert!(store.push_version("broken", "value_", "c").is_err());
    assert_eq!(store.keys("value_").unwrap().len(), 2);
}

#[cfg(test)]
struct UnavailableStore(MemoryStore);

#[cfg(test)]
impl ResultStore for UnavailableStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.0.get(key)
    }

    fn set(&self, _: &str, _: &str) -> Result<()> {
        Err(Error::Msg("store unavailable".to_string()))
    }

    fn push_version(&self, _: &str, _: &str, _: &str) -> Result<u64> {
        Err(Error::Msg("store unavailable".to_string()))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.0.keys(prefix)
    }
}

#[cfg(test)]
#[test]
fn failed_save_leaves_no_version() {
    let repository = Repository::new(Arc::new(UnavailableStore(MemoryStore::new())));
    let portfolio = sample_portfolio("fixed grid");

    assert!(matches!(repository.save(&portfolio), Err(Error::Msg(_))));
    assert!(repository.list().unwrap().is_empty());
    let id = result_id(&portfolio).unwrap();
    assert!(matches!(repository.fetch_raw(&id, 1), Err(Error::VersionNotFound { .. })));
}
