//! Error types shared by all StrataDB crates.
//!
//! [`StrataError`] is the workspace-wide error type; fallible functions in
//! other crates return [`StrataResult`]. Insert-request parse failures have
//! their own client-visible taxonomy, [`InsertError`], because their message
//! strings are part of the client protocol and must not drift.

use thiserror::Error;

/// Result type alias using [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;

/// An error that occurred while operating a StrataDB node.
#[derive(Debug, Error)]
pub enum StrataError {
    /// A malformed or rejected insert request. The wrapped error's display
    /// string is what the client sees.
    #[error(transparent)]
    Insert(#[from] InsertError),

    /// A pool that was validated at request admission no longer has any
    /// reachable server.
    #[error("no server available for pool {pool}")]
    PoolGone {
        /// The unreachable pool.
        pool: u16,
    },

    /// The process-wide fatal latch was set; the operation was abandoned to
    /// avoid applying points twice.
    #[error("a critical error occurred on '{server}'")]
    Fatal {
        /// Name of the server the latch was observed on.
        server: String,
    },

    /// An I/O error, usually from the admin filesystem surface.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An invariant was violated somewhere inside StrataDB.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why an insert request was rejected during parsing.
///
/// The display strings are sent to clients verbatim inside the `error_msg`
/// reply field; keep them stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    #[error("Expecting an array with points.")]
    ExpectingArray,

    #[error(
        "Expecting a series name (string value) with an array of points \
         where each point should be an integer time-stamp with a value."
    )]
    ExpectingSeriesName,

    #[error("Expecting an array or map containing series and points.")]
    ExpectingMapOrArray,

    #[error("Expecting an integer value as time-stamp.")]
    ExpectingIntegerTs,

    #[error("Received at least one time-stamp which is out-of-range.")]
    TimestampOutOfRange,

    #[error(
        "Unsupported value received. (only integer, string and float values \
         are supported)."
    )]
    UnsupportedValue,

    #[error("Expecting a series to have at least one point.")]
    ExpectingAtLeastOnePoint,

    #[error("Expecting a map with name and points.")]
    ExpectingNameAndPoints,

    #[error("Critical memory allocation error")]
    MemAlloc,
}

/// Construct a [`StrataError::Internal`] from format arguments.
///
/// Use [`internal!`] instead when inside a function returning
/// [`StrataResult`].
#[macro_export]
macro_rules! internal_err {
    ($($tt:tt)*) => {
        $crate::StrataError::Internal(format!($($tt)*))
    };
}

/// Return early with a [`StrataError::Internal`].
#[macro_export]
macro_rules! internal {
    ($($tt:tt)*) => {
        return Err($crate::internal_err!($($tt)*).into())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_error_messages_are_stable() {
        assert_eq!(
            InsertError::ExpectingAtLeastOnePoint.to_string(),
            "Expecting a series to have at least one point."
        );
        assert_eq!(
            InsertError::ExpectingMapOrArray.to_string(),
            "Expecting an array or map containing series and points."
        );
    }

    #[test]
    fn internal_macro_formats() {
        fn fails() -> StrataResult<()> {
            internal!("bad pool index {}", 7)
        }
        match fails() {
            Err(StrataError::Internal(msg)) => assert_eq!(msg, "bad pool index 7"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
