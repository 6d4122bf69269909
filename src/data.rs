//! Price series in CSV form.
//!
//! The first five columns must be `timestamp, open, high, low, close` (header matched
//! case-insensitively, extra columns ignored). The timestamp is a Unix epoch in seconds
//! and may carry a decimal fraction.
//!
//! ```csv
//! timestamp,open,high,low,close
//! 1672531200,16541.77,16545.70,16508.39,16529.67
//! 1672534800.5,16529.59,16556.80,16525.78,16551.47
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::engine::{Candle, CandleBuilder};
use crate::errors::{Error, Result};
use crate::utils::{datetime_from_epoch, epoch_from_datetime};

/// Required leading columns, in order.
pub const COLUMNS: [&str; 5] = ["timestamp", "open", "high", "low", "close"];

/// Reads candles from any CSV source.
///
/// Fails before reading a row if the header is wrong or missing, and on the first malformed row after that.
pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = reader.records();
    let header = match records.next() {
        Some(header) => header?,
        None => return Err(Error::CsvHeader(String::new())),
    };
    check_header(&header)?;

    let mut candles = Vec::new();
    for record in records {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());

        let mut numbers = [0.0; 5];
        for (i, &column) in COLUMNS.iter().enumerate() {
            let value = record.get(i).ok_or(Error::MissingColumn { column, line })?;
            numbers[i] = value.parse().map_err(|_| Error::InvalidNumber {
                column,
                value: value.to_string(),
                line,
            })?;
        }

        let [timestamp, open, high, low, close] = numbers;
        let candle = CandleBuilder::builder()
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .timestamp(datetime_from_epoch(timestamp)?)
            .build()?;
        candles.push(candle);
    }

    Ok(candles)
}

fn check_header(header: &csv::StringRecord) -> Result<()> {
    let valid = header.len() >= COLUMNS.len()
        && COLUMNS
            .iter()
            .zip(header.iter())
            .all(|(expected, found)| expected.eq_ignore_ascii_case(found));
    if !valid {
        return Err(Error::CsvHeader(header.iter().collect::<Vec<_>>().join(",")));
    }
    Ok(())
}

/// Reads candles from a CSV file.
pub fn load_csv(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    let candles = read_candles(file)?;
    tracing::debug!(path = %path.display(), candles = candles.len(), "price series loaded");
    Ok(candles)
}

/// Writes candles in the format [`read_candles`] accepts.
pub fn write_candles<W: Write>(writer: W, candles: &[Candle]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(COLUMNS)?;
    for candle in candles {
        writer.write_record([
            epoch_from_datetime(candle.timestamp()).to_string(),
            candle.open().to_string(),
            candle.high().to_string(),
            candle.low().to_string(),
            candle.close().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes candles to a CSV file, replacing it.
pub fn save_csv(path: &Path, candles: &[Candle]) -> Result<()> {
    let file = File::create(path)?;
    write_candles(file, candles)?;
    tracing::debug!(path = %path.display(), candles = candles.len(), "price series saved");
    Ok(())
}

#[cfg(test)]
const SAMPLE: &str = "Timestamp,OPEN,High,low,Close,Volume
1672531200,100,110,95,105,12.5
1672534800.5,102,108,90,100,3
";

#[cfg(test)]
#[test]
fn read_valid_csv() {
    let candles = read_candles(SAMPLE.as_bytes()).unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].open(), 100.0);
    assert_eq!(candles[0].timestamp().timestamp(), 1_672_531_200);
    assert_eq!(candles[1].low(), 90.0);
    assert_eq!(candles[1].timestamp().timestamp_subsec_millis(), 500);
}

#[cfg(test)]
#[test]
fn read_rejects_bad_header() {
    let result = read_candles("time,open,high,low,close\n1,1,1,1,1\n".as_bytes());
    assert!(matches!(result, Err(Error::CsvHeader(found)) if found == "time,open,high,low,close"));

    let result = read_candles("timestamp,open,high,low\n1,1,1,1\n".as_bytes());
    assert!(matches!(result, Err(Error::CsvHeader(_))));
}

#[cfg(test)]
#[test]
fn read_rejects_non_numeric_field() {
    let result = read_candles("timestamp,open,high,low,close\n1,1,1,1,1\n2,1,abc,1,1\n".as_bytes());
    match result {
        Err(Error::InvalidNumber { column, value, line }) => {
            assert_eq!(column, "high");
            assert_eq!(value, "abc");
            assert_eq!(line, 3);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[cfg(test)]
#[test]
fn read_rejects_short_row() {
    let result = read_candles("timestamp,open,high,low,close\n1,1,1,1\n".as_bytes());
    assert!(matches!(result, Err(Error::MissingColumn { column: "close", line: 2 })));
}

#[cfg(test)]
#[test]
fn read_rejects_broken_candle() {
    let result = read_candles("timestamp,open,high,low,close\n1,100,90,80,85\n".as_bytes());
    assert!(matches!(result, Err(Error::InvalidCandle { .. })));
}

#[cfg(test)]
#[test]
fn read_rejects_zero_price() {
    let result = read_candles("timestamp,open,high,low,close\n1,0,1,0,0.5\n".as_bytes());
    assert!(matches!(result, Err(Error::InvalidCandle { .. })));
}

#[cfg(test)]
#[test]
fn read_empty_source() {
    assert!(matches!(read_candles("".as_bytes()), Err(Error::CsvHeader(h)) if h.is_empty()));
    assert!(read_candles("timestamp,open,high,low,close\n".as_bytes()).unwrap().is_empty());
}

#[cfg(test)]
#[test]
fn save_then_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prices.csv");

    let candles = read_candles(SAMPLE.as_bytes()).unwrap();
    save_csv(&path, &candles).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("timestamp,open,high,low,close\n1672531200,100,110,95,105\n"));
    assert_eq!(load_csv(&path).unwrap(), candles);
}

#[cfg(test)]
#[test]
fn load_missing_file() {
    let result = load_csv(Path::new("/nonexistent/prices.csv"));
    assert!(matches!(result, Err(Error::IoError(_))));
}
