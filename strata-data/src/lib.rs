//! Core data types for StrataDB: time-series values and points, series
//! naming rules, and the per-database configuration surface.

mod config;
mod value;

pub use config::{
    parse_duration, ConfigError, DatabaseConfig, TimePrecision, DEFAULT_BUFFER_SIZE,
    DEFAULT_DURATION_LOG, DEFAULT_DURATION_NUM,
};
pub use value::{Point, SeriesName, Value, ValueKind, SERIES_NAME_LEN_MAX};
