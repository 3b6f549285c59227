//! Error types

use std::fmt;
use std::io;

/// Errors produced while decoding a container or archive fork.
///
/// Every variant corresponds to one of the abstract error kinds named in
/// the format specification (truncated input, invalid symbol, CRC
/// mismatch, invalid header, unsupported feature, misuse, overflow). There
/// is no global or thread-local error state: every fallible operation in
/// this crate returns `Result<_, ParseError>` directly.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ParseError {
    /// EOF was reached unexpectedly, inside a header, bitstream, or fork.
    BadEof,
    /// A value was outside the expected range.
    BadValue,
    /// A version field contained an unsupported version.
    BadVersion,
    /// An offset was outside allowed bounds.
    BadOffset,
    /// An index was outside the valid range.
    BadIndex,
    /// A value overflowed its storage type, or a declared length/offset was
    /// large enough that honoring it would require an unreasonable
    /// allocation.
    Overflow,
    /// CRC did not match the expected value.
    CrcMismatch,
    /// A layer's identifying structure failed its invariants: bad magic,
    /// unexpected field value, or a directory that doesn't add up.
    InvalidHeader(&'static str),
    /// A Huffman, arithmetic, or LZW symbol decoded to a reserved or
    /// out-of-range value.
    InvalidSymbol(&'static str),
    /// A compression method, archive variant, or feature (e.g. encrypted
    /// entries) that this crate does not implement.
    Unsupported(&'static str),
    /// The caller called `read` before `open`, or iterated past the end of
    /// a layer's forks.
    Misuse(&'static str),
    /// The underlying byte source (file) could not be read.
    Io(io::ErrorKind),
}

impl From<std::num::TryFromIntError> for ParseError {
    fn from(_error: std::num::TryFromIntError) -> Self {
        ParseError::BadValue
    }
}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        ParseError::Io(error.kind())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BadEof => write!(f, "end of data reached unexpectedly"),
            ParseError::BadValue => write!(f, "invalid value"),
            ParseError::BadVersion => write!(f, "unexpected data version"),
            ParseError::BadOffset => write!(f, "invalid data offset"),
            ParseError::BadIndex => write!(f, "invalid data index"),
            ParseError::Overflow => write!(f, "a value overflowed its range"),
            ParseError::CrcMismatch => write!(f, "CRC mismatch"),
            ParseError::InvalidHeader(what) => write!(f, "invalid header: {what}"),
            ParseError::InvalidSymbol(what) => write!(f, "invalid symbol: {what}"),
            ParseError::Unsupported(what) => write!(f, "unsupported: {what}"),
            ParseError::Misuse(what) => write!(f, "misuse: {what}"),
            ParseError::Io(kind) => write!(f, "I/O error: {kind:?}"),
        }
    }
}

impl std::error::Error for ParseError {}
