//! Streaming codec for StrataDB's self-describing typed format.
//!
//! The format is a flat tag stream: composite openers/closers (`MAP_OPEN`,
//! `MAP_CLOSE`, `ARRAY_OPEN`, `ARRAY_CLOSE`), a fixed two-element array tag
//! (`ARRAY2`, used for `[timestamp, value]` pairs), and three scalar kinds
//! (length-prefixed `RAW`, little-endian `INT64` and `DOUBLE`). The exact
//! byte layout is private to this crate; peers on both ends of a connection
//! always run the same build.
//!
//! [`Decoder`] is a single-pass cursor over a borrowed buffer. It never
//! backtracks across values, but a [`Checkpoint`] may be taken at a value
//! boundary and restored later, which the insert path uses to peek a series'
//! first value before deciding how to create the series.

mod error;

pub use error::DecodeError;

use bytes::{BufMut, Bytes, BytesMut};
use enum_kinds::EnumKind;

/// Default capacity hint for encoder buffers.
pub const SUGGESTED_SIZE: usize = 65536;

const TAG_MAP_OPEN: u8 = 0xe0;
const TAG_MAP_CLOSE: u8 = 0xe1;
const TAG_ARRAY_OPEN: u8 = 0xe2;
const TAG_ARRAY_CLOSE: u8 = 0xe3;
const TAG_ARRAY2: u8 = 0xe4;
const TAG_RAW: u8 = 0xc4;
const TAG_INT64: u8 = 0xc8;
const TAG_DOUBLE: u8 = 0xc9;

/// One decoded value (or structural marker) from the stream.
///
/// `End` is produced when the cursor has consumed the whole buffer; it is not
/// itself encoded.
#[derive(Debug, Clone, Copy, PartialEq, EnumKind)]
#[enum_kind(Tag)]
pub enum Token<'a> {
    MapOpen,
    MapClose,
    ArrayOpen,
    ArrayClose,
    /// Opens a fixed array of exactly two values; there is no closing tag.
    Array2,
    Raw(&'a [u8]),
    Int64(i64),
    Double(f64),
    End,
}

/// A saved cursor position, valid only at a boundary between values.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint(usize);

/// Cursor over an encoded buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    /// The tag of the next value, without advancing the cursor.
    pub fn peek(&self) -> Result<Tag, DecodeError> {
        match self.buf.get(self.pos) {
            None => Ok(Tag::End),
            Some(&TAG_MAP_OPEN) => Ok(Tag::MapOpen),
            Some(&TAG_MAP_CLOSE) => Ok(Tag::MapClose),
            Some(&TAG_ARRAY_OPEN) => Ok(Tag::ArrayOpen),
            Some(&TAG_ARRAY_CLOSE) => Ok(Tag::ArrayClose),
            Some(&TAG_ARRAY2) => Ok(Tag::Array2),
            Some(&TAG_RAW) => Ok(Tag::Raw),
            Some(&TAG_INT64) => Ok(Tag::Int64),
            Some(&TAG_DOUBLE) => Ok(Tag::Double),
            Some(&other) => Err(DecodeError::UnknownTag(other)),
        }
    }

    /// Decode the next value and advance the cursor past it.
    pub fn next(&mut self) -> Result<Token<'a>, DecodeError> {
        let tag = match self.buf.get(self.pos) {
            None => return Ok(Token::End),
            Some(&t) => t,
        };
        self.pos += 1;
        match tag {
            TAG_MAP_OPEN => Ok(Token::MapOpen),
            TAG_MAP_CLOSE => Ok(Token::MapClose),
            TAG_ARRAY_OPEN => Ok(Token::ArrayOpen),
            TAG_ARRAY_CLOSE => Ok(Token::ArrayClose),
            TAG_ARRAY2 => Ok(Token::Array2),
            TAG_RAW => {
                let len = self.take(4)?;
                let len = u32::from_le_bytes(len.try_into().expect("4 bytes")) as usize;
                let remaining = self.buf.len() - self.pos;
                if len > remaining {
                    return Err(DecodeError::TruncatedRaw { len, remaining });
                }
                let raw = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                Ok(Token::Raw(raw))
            }
            TAG_INT64 => {
                let b = self.take(8)?;
                Ok(Token::Int64(i64::from_le_bytes(b.try_into().expect("8 bytes"))))
            }
            TAG_DOUBLE => {
                let b = self.take(8)?;
                Ok(Token::Double(f64::from_le_bytes(
                    b.try_into().expect("8 bytes"),
                )))
            }
            other => {
                self.pos -= 1;
                Err(DecodeError::UnknownTag(other))
            }
        }
    }

    /// Skip one whole value; composites are skipped with their entire
    /// subtree.
    pub fn skip(&mut self) -> Result<(), DecodeError> {
        match self.next()? {
            Token::MapOpen => self.skip_until(Tag::MapClose),
            Token::ArrayOpen => self.skip_until(Tag::ArrayClose),
            Token::Array2 => {
                self.skip()?;
                self.skip()
            }
            _ => Ok(()),
        }
    }

    fn skip_until(&mut self, close: Tag) -> Result<(), DecodeError> {
        loop {
            match self.peek()? {
                Tag::End => return Err(DecodeError::Unbalanced),
                tag if tag == close => {
                    self.next()?;
                    return Ok(());
                }
                _ => self.skip()?,
            }
        }
    }

    /// Copy the next whole value, verbatim, into `dst`, advancing the cursor
    /// past it.
    pub fn extend(&mut self, dst: &mut Encoder) -> Result<(), DecodeError> {
        let start = self.pos;
        self.skip()?;
        dst.add_encoded(&self.buf[start..self.pos]);
        Ok(())
    }

    /// Save the cursor. Only meaningful at a boundary between values.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    /// Restore a previously saved cursor.
    pub fn restore(&mut self, cp: Checkpoint) {
        self.pos = cp.0;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            self.pos = self.buf.len();
            return Err(DecodeError::UnexpectedEnd);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Growable buffer of encoded values.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Encoder {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn add_map_open(&mut self) {
        self.buf.put_u8(TAG_MAP_OPEN);
    }

    pub fn add_map_close(&mut self) {
        self.buf.put_u8(TAG_MAP_CLOSE);
    }

    pub fn add_array_open(&mut self) {
        self.buf.put_u8(TAG_ARRAY_OPEN);
    }

    pub fn add_array_close(&mut self) {
        self.buf.put_u8(TAG_ARRAY_CLOSE);
    }

    pub fn add_array2(&mut self) {
        self.buf.put_u8(TAG_ARRAY2);
    }

    pub fn add_raw(&mut self, raw: &[u8]) {
        self.buf.put_u8(TAG_RAW);
        self.buf.put_u32_le(raw.len() as u32);
        self.buf.put_slice(raw);
    }

    /// Add a raw value in key position. The format needs no key terminator,
    /// so this encodes identically to [`add_raw`](Self::add_raw); call sites
    /// keep the distinction for readability.
    pub fn add_raw_term(&mut self, raw: &[u8]) {
        self.add_raw(raw);
    }

    pub fn add_string(&mut self, s: &str) {
        self.add_raw(s.as_bytes());
    }

    pub fn add_int64(&mut self, n: i64) {
        self.buf.put_u8(TAG_INT64);
        self.buf.put_i64_le(n);
    }

    pub fn add_double(&mut self, d: f64) {
        self.buf.put_u8(TAG_DOUBLE);
        self.buf.put_f64_le(d);
    }

    /// Append already-encoded bytes, e.g. a scratch buffer or a value copied
    /// out of a [`Decoder`].
    pub fn add_encoded(&mut self, encoded: &[u8]) {
        self.buf.put_slice(encoded);
    }

    /// Number of encoded bytes so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop everything encoded so far, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze into an immutable byte buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prop_assert_eq;
    use test_strategy::proptest;

    use super::*;

    fn decode_all(buf: &[u8]) -> Vec<Token<'_>> {
        let mut dec = Decoder::new(buf);
        let mut out = vec![];
        loop {
            match dec.next().unwrap() {
                Token::End => return out,
                t => out.push(t),
            }
        }
    }

    #[test]
    fn peek_does_not_advance() {
        let mut enc = Encoder::new();
        enc.add_int64(7);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.peek().unwrap(), Tag::Int64);
        assert_eq!(dec.peek().unwrap(), Tag::Int64);
        assert_eq!(dec.next().unwrap(), Token::Int64(7));
        assert_eq!(dec.peek().unwrap(), Tag::End);
    }

    #[test]
    fn skip_whole_composites() {
        let mut enc = Encoder::new();
        enc.add_map_open();
        enc.add_raw(b"cpu");
        enc.add_array_open();
        enc.add_array2();
        enc.add_int64(1);
        enc.add_int64(2);
        enc.add_array_close();
        enc.add_map_close();
        enc.add_int64(99);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        dec.skip().unwrap();
        assert_eq!(dec.next().unwrap(), Token::Int64(99));
    }

    #[test]
    fn extend_copies_verbatim() {
        let mut enc = Encoder::new();
        enc.add_array_open();
        enc.add_array2();
        enc.add_int64(1000);
        enc.add_double(0.25);
        enc.add_array_close();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let mut dst = Encoder::new();
        dec.extend(&mut dst).unwrap();
        assert_eq!(dst.as_slice(), &bytes[..]);
        assert_eq!(dec.peek().unwrap(), Tag::End);
    }

    #[test]
    fn checkpoint_restores_to_value_boundary() {
        let mut enc = Encoder::new();
        enc.add_array_open();
        enc.add_array2();
        enc.add_int64(5);
        enc.add_raw(b"v");
        enc.add_array_close();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let cp = dec.checkpoint();
        assert_eq!(dec.next().unwrap(), Token::ArrayOpen);
        assert_eq!(dec.next().unwrap(), Token::Array2);
        assert_eq!(dec.next().unwrap(), Token::Int64(5));
        dec.restore(cp);
        assert_eq!(dec.next().unwrap(), Token::ArrayOpen);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let mut dec = Decoder::new(&[0x00]);
        assert!(matches!(dec.next(), Err(DecodeError::UnknownTag(0x00))));
    }

    #[test]
    fn raw_length_past_end_is_malformed() {
        let mut enc = Encoder::new();
        enc.add_raw(b"abcdef");
        let mut bytes = enc.into_bytes().to_vec();
        bytes.truncate(bytes.len() - 3);
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            dec.next(),
            Err(DecodeError::TruncatedRaw { len: 6, .. })
        ));
    }

    #[test]
    fn unbalanced_composite_fails_skip() {
        let mut enc = Encoder::new();
        enc.add_array_open();
        enc.add_int64(1);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(dec.skip(), Err(DecodeError::Unbalanced)));
    }

    #[proptest]
    fn int64_round_trips_identically(n: i64) {
        let mut enc = Encoder::new();
        enc.add_int64(n);
        let first = enc.into_bytes();

        let mut dec = Decoder::new(&first);
        let Token::Int64(decoded) = dec.next().unwrap() else {
            panic!("expected int64");
        };
        let mut again = Encoder::new();
        again.add_int64(decoded);
        prop_assert_eq!(again.into_bytes(), first);
    }

    #[proptest]
    fn double_round_trips_identically(d: f64) {
        let mut enc = Encoder::new();
        enc.add_double(d);
        let first = enc.into_bytes();

        let mut dec = Decoder::new(&first);
        let Token::Double(decoded) = dec.next().unwrap() else {
            panic!("expected double");
        };
        let mut again = Encoder::new();
        again.add_double(decoded);
        // NaN payloads must survive byte-for-byte even though NaN != NaN.
        prop_assert_eq!(again.into_bytes(), first);
    }

    #[proptest]
    fn raw_round_trips_identically(raw: Vec<u8>) {
        let mut enc = Encoder::new();
        enc.add_raw(&raw);
        let first = enc.into_bytes();

        let mut dec = Decoder::new(&first);
        let Token::Raw(decoded) = dec.next().unwrap() else {
            panic!("expected raw");
        };
        let mut again = Encoder::new();
        again.add_raw(decoded);
        prop_assert_eq!(again.into_bytes(), first);
    }

    #[test]
    fn token_stream_shape() {
        let mut enc = Encoder::new();
        enc.add_map_open();
        enc.add_raw_term(b"cpu");
        enc.add_array_open();
        enc.add_array2();
        enc.add_int64(1000);
        enc.add_int64(42);
        enc.add_array_close();
        enc.add_map_close();
        let bytes = enc.into_bytes();

        assert_eq!(
            decode_all(&bytes),
            vec![
                Token::MapOpen,
                Token::Raw(b"cpu"),
                Token::ArrayOpen,
                Token::Array2,
                Token::Int64(1000),
                Token::Int64(42),
                Token::ArrayClose,
                Token::MapClose,
            ]
        );
    }
}
