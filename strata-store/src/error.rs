use strata_data::ValueKind;
use thiserror::Error;

/// A rejected series-store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The series was created with a different value kind. A series' kind is
    /// fixed for its lifetime.
    #[error("series '{series}' holds {expected:?} values, got {got:?}")]
    UnsupportedValue {
        series: String,
        expected: ValueKind,
        got: ValueKind,
    },

    #[error("invalid series name")]
    InvalidName,

    #[error("series '{0}' already exists")]
    SeriesExists(String),
}
