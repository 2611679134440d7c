use thiserror::Error;

/// A malformed encoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unrecognized tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("raw length prefix {len} exceeds the {remaining} remaining bytes")]
    TruncatedRaw { len: usize, remaining: usize },

    #[error("composite value is not closed before end of input")]
    Unbalanced,
}
