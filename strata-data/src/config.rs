use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default buffer size in bytes for a new database.
pub const DEFAULT_BUFFER_SIZE: u64 = 1024;
/// Default numeric-shard duration, in seconds (scaled by precision).
pub const DEFAULT_DURATION_NUM: u64 = 604800;
/// Default log-shard duration, in seconds (scaled by precision).
pub const DEFAULT_DURATION_LOG: u64 = 86400;

static DBNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z][a-zA-Z0-9-_]{0,18}[a-zA-Z0-9]$").expect("static regex"));

/// A rejected database configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid time precision: '{0}' (expecting s, ms, us or ns)")]
    InvalidTimePrecision(String),

    #[error("invalid number duration: '{0}' (valid examples: 6h, 2d or 1w)")]
    InvalidDurationNum(String),

    #[error("invalid log duration: '{0}' (valid examples: 6h, 2d or 1w)")]
    InvalidDurationLog(String),

    #[error("invalid buffer size: '{0}' (expecting a multiple of 512)")]
    InvalidBufferSize(i64),

    #[error("invalid database name: '{0}'")]
    InvalidDatabaseName(String),
}

/// Resolution of the timestamps a database stores.
///
/// Second-precision timestamps must fit 32 bits; each finer precision scales
/// the valid range by 1000.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePrecision {
    #[default]
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "ms")]
    Milli,
    #[serde(rename = "us")]
    Micro,
    #[serde(rename = "ns")]
    Nano,
}

impl TimePrecision {
    /// Ticks per second at this precision.
    pub fn factor(self) -> u64 {
        match self {
            TimePrecision::Second => 1,
            TimePrecision::Milli => 1_000,
            TimePrecision::Micro => 1_000_000,
            TimePrecision::Nano => 1_000_000_000,
        }
    }

    /// The largest timestamp a database at this precision accepts.
    pub fn max_timestamp(self) -> u64 {
        u64::from(u32::MAX) * self.factor()
    }
}

impl fmt::Display for TimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimePrecision::Second => "s",
            TimePrecision::Milli => "ms",
            TimePrecision::Micro => "us",
            TimePrecision::Nano => "ns",
        };
        f.write_str(s)
    }
}

impl FromStr for TimePrecision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(TimePrecision::Second),
            "ms" => Ok(TimePrecision::Milli),
            "us" => Ok(TimePrecision::Micro),
            "ns" => Ok(TimePrecision::Nano),
            other => Err(ConfigError::InvalidTimePrecision(other.into())),
        }
    }
}

/// Parse a human duration like `6h`, `2d` or `1w` into ticks at `precision`.
///
/// The count must be within `1..=99`. Returns `None` for anything else.
pub fn parse_duration(s: &str, precision: TimePrecision) -> Option<u64> {
    if s.len() < 2 || !s.is_ascii() {
        return None;
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let val: u64 = num.parse().ok()?;
    if !(1..=99).contains(&val) {
        return None;
    }
    let seconds = match unit {
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return None,
    };
    Some(precision.factor() * val * seconds)
}

/// Validated configuration of one database.
///
/// Produced by the admin `new database` request and consumed by the series
/// store's timestamp-range and shard-duration policies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dbname: String,
    pub time_precision: TimePrecision,
    /// On-disk buffer size in bytes; a multiple of 512, at least 512.
    pub buffer_size: u64,
    /// Shard duration for numeric series, in ticks.
    pub duration_num: u64,
    /// Shard duration for log series, in ticks.
    pub duration_log: u64,
}

impl DatabaseConfig {
    /// Build a configuration, applying defaults for every omitted field and
    /// validating the rest.
    pub fn new(
        dbname: &str,
        time_precision: Option<TimePrecision>,
        buffer_size: Option<i64>,
        duration_num: Option<&str>,
        duration_log: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if !DBNAME_RE.is_match(dbname) {
            return Err(ConfigError::InvalidDatabaseName(dbname.into()));
        }

        let time_precision = time_precision.unwrap_or_default();

        let buffer_size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE as i64);
        if buffer_size % 512 != 0 || buffer_size < 512 {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }
        let buffer_size = buffer_size as u64;

        let duration_num = match duration_num {
            None => DEFAULT_DURATION_NUM * time_precision.factor(),
            Some(s) => parse_duration(s, time_precision)
                .ok_or_else(|| ConfigError::InvalidDurationNum(s.into()))?,
        };
        let duration_log = match duration_log {
            None => DEFAULT_DURATION_LOG * time_precision.factor(),
            Some(s) => parse_duration(s, time_precision)
                .ok_or_else(|| ConfigError::InvalidDurationLog(s.into()))?,
        };

        Ok(DatabaseConfig {
            dbname: dbname.to_owned(),
            time_precision,
            buffer_size,
            duration_num,
            duration_log,
        })
    }

    /// Whether `ts` lies within this database's configured timestamp range.
    pub fn valid_ts(&self, ts: i64) -> bool {
        ts >= 0 && (ts as u64) <= self.time_precision.max_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbname_pattern() {
        for ok in ["db", "timeseries", "my-db_01", "aB3", "a2345678901234567890"] {
            assert!(
                DatabaseConfig::new(ok, None, None, None, None).is_ok(),
                "{ok} should be accepted"
            );
        }
        for bad in [
            "",
            "a",
            "1db",
            "-db",
            "db-",
            "db_",
            "a23456789012345678901", // 21 chars
            "has space",
        ] {
            assert!(
                matches!(
                    DatabaseConfig::new(bad, None, None, None, None),
                    Err(ConfigError::InvalidDatabaseName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn buffer_size_multiple_of_512() {
        assert!(DatabaseConfig::new("db", None, Some(512), None, None).is_ok());
        assert!(DatabaseConfig::new("db", None, Some(4096), None, None).is_ok());
        for bad in [-512, 0, 100, 511, 513, 1000] {
            assert_eq!(
                DatabaseConfig::new("db", None, Some(bad), None, None),
                Err(ConfigError::InvalidBufferSize(bad))
            );
        }
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(
            parse_duration("6h", TimePrecision::Second),
            Some(6 * 3600)
        );
        assert_eq!(
            parse_duration("2d", TimePrecision::Milli),
            Some(2 * 86400 * 1000)
        );
        assert_eq!(
            parse_duration("1w", TimePrecision::Second),
            Some(604800)
        );
        assert_eq!(parse_duration("0h", TimePrecision::Second), None);
        assert_eq!(parse_duration("100h", TimePrecision::Second), None);
        assert_eq!(parse_duration("5x", TimePrecision::Second), None);
        assert_eq!(parse_duration("h", TimePrecision::Second), None);
        assert_eq!(parse_duration("", TimePrecision::Second), None);
    }

    #[test]
    fn durations_default_scaled_by_precision() {
        let cfg = DatabaseConfig::new("db", Some(TimePrecision::Milli), None, None, None).unwrap();
        assert_eq!(cfg.duration_num, DEFAULT_DURATION_NUM * 1000);
        assert_eq!(cfg.duration_log, DEFAULT_DURATION_LOG * 1000);
    }

    #[test]
    fn ts_range_per_precision() {
        let s = DatabaseConfig::new("db", Some(TimePrecision::Second), None, None, None).unwrap();
        assert!(s.valid_ts(0));
        assert!(s.valid_ts(u32::MAX as i64));
        assert!(!s.valid_ts(u32::MAX as i64 + 1));
        assert!(!s.valid_ts(-1));

        let ms = DatabaseConfig::new("db", Some(TimePrecision::Milli), None, None, None).unwrap();
        assert!(ms.valid_ts(u32::MAX as i64 + 1));
        assert!(ms.valid_ts((u32::MAX as i64) * 1000));
        assert!(!ms.valid_ts((u32::MAX as i64) * 1000 + 1));
    }
}
