use std::sync::Mutex;

use redis::{Client, Commands, Connection, Script};

use super::ResultStore;
use crate::errors::{Error, Result};

const PUSH_VERSION: &str = r"
local version = redis.call('INCR', KEYS[1])
redis.call('SET', ARGV[1] .. version, ARGV[2])
return version
";

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Redis-backed [`ResultStore`] over one synchronous connection.
pub struct RedisStore {
    connection: Mutex<Connection>,
    push_version: Script,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6380/3`).
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = client.get_connection()?;
        tracing::debug!(url, "connected to redis");
        Ok(Self {
            connection: Mutex::new(connection),
            push_version: Script::new(PUSH_VERSION),
        })
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|e| Error::Mutex(e.to_string()))
    }
}

impl ResultStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.connection()?.get(key)?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.connection()?.set(key, value)?;
        Ok(())
    }

    // INCR and SET run inside one script, which Redis executes atomically.
    fn push_version(&self, counter: &str, value_prefix: &str, value: &str) -> Result<u64> {
        let mut connection = self.connection()?;
        let version: u64 = self
            .push_version
            .key(counter)
            .arg(value_prefix)
            .arg(value)
            .invoke(&mut *connection)?;
        Ok(version)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut connection = self.connection()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query(&mut *connection)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}
