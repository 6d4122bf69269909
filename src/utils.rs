use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// Converts a fractional Unix epoch in seconds into a UTC datetime.
pub(crate) fn datetime_from_epoch(epoch: f64) -> Result<DateTime<Utc>> {
    if !epoch.is_finite() {
        return Err(Error::InvalidTimestamp(epoch));
    }
    let secs = epoch.floor();
    let nanos = ((epoch - secs) * 1e9).round() as u32;
    // rounding may carry a whole second
    let (secs, nanos) = if nanos >= 1_000_000_000 {
        (secs + 1.0, 0)
    } else {
        (secs, nanos)
    };
    if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return Err(Error::InvalidTimestamp(epoch));
    }
    DateTime::from_timestamp(secs as i64, nanos).ok_or(Error::InvalidTimestamp(epoch))
}

/// Renders a datetime as a fractional Unix epoch in seconds.
pub(crate) fn epoch_from_datetime(datetime: DateTime<Utc>) -> f64 {
    datetime.timestamp() as f64 + datetime.timestamp_subsec_nanos() as f64 / 1e9
}

/// Lower-cases `s` and replaces every non-alphanumeric character with `-`.
pub(crate) fn sanitize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
#[test]
fn epoch_with_fraction() {
    let dt = datetime_from_epoch(1_700_000_000.25).unwrap();
    assert_eq!(dt.timestamp(), 1_700_000_000);
    assert_eq!(dt.timestamp_subsec_millis(), 250);
    assert_eq!(epoch_from_datetime(dt), 1_700_000_000.25);
}

#[cfg(test)]
#[test]
fn epoch_before_1970() {
    let dt = datetime_from_epoch(-1.5).unwrap();
    assert_eq!(dt.timestamp(), -2);
    assert_eq!(dt.timestamp_subsec_millis(), 500);
}

#[cfg(test)]
#[test]
fn epoch_rejects_nan() {
    assert!(matches!(datetime_from_epoch(f64::NAN), Err(Error::InvalidTimestamp(_))));
    assert!(matches!(datetime_from_epoch(1e300), Err(Error::InvalidTimestamp(_))));
}

#[cfg(test)]
#[test]
fn sanitize_names() {
    assert_eq!(sanitize("Fixed Grid"), "fixed-grid");
    assert_eq!(sanitize("AMM Arbitrage Strategy"), "amm-arbitrage-strategy");
    assert_eq!(sanitize("ma_crossover/v2"), "ma-crossover-v2");
}
