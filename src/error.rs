//! Library-wide error and result types.

use std::fmt;
use std::io;

/// Result alias used throughout fbarc.
pub type Result<T> = std::result::Result<T, Error>;

/// What kind of thing could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No catalog entry for this SHA-1 (hex form carried for diagnostics).
    Sha1(String),
    /// `<name>.toc` does not exist beside the catalog.
    Superbundle(String),
    /// `cas_NN.cas` does not exist beside the catalog.
    Shard(i32),
    /// No bundle entry for this id.
    BundleFile(String),
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Sha1(hex) => write!(f, "no catalog entry for sha1 {hex}"),
            NotFoundKind::Superbundle(name) => write!(f, "no superbundle named {name:?}"),
            NotFoundKind::Shard(num) => write!(f, "no shard file for cas_num {num}"),
            NotFoundKind::BundleFile(id) => write!(f, "no bundle file with id {id:?}"),
        }
    }
}

/// All errors the library can produce.
///
/// Error messages are kept intentionally terse; callers that need richer
/// context should wrap `Error` in their own type.
#[derive(Debug)]
pub enum Error {
    /// A magic/signature field or start marker did not match the expected
    /// value.
    BadMagic,
    /// The typecode byte's low 5 bits did not match any known type.
    /// `raw` is the untouched byte as read, `code` is `raw & 0x1F`.
    UnknownTypecode { raw: u8, code: u8 },
    /// A `bstring` was missing its trailing NUL byte.
    UnterminatedBstring,
    /// A varint ran past 10 bytes (64 bits) without terminating.
    VarintTooLong,
    /// A complete object was decoded but bytes remained in the stream.
    TrailingData,
    /// A structural constraint was violated (message describes which one).
    Parse(&'static str),
    /// A read or seek would exceed the bounds of the current reader.
    Truncation,
    /// A lookup into a catalog, superbundle, or bundle came up empty.
    NotFound(NotFoundKind),
    /// The operation was requested in a context that does not support it
    /// (e.g. a selector segment that is neither numeric, `*`, nor a plain
    /// string; dereferencing chunk references before a catalog is attached).
    Usage(&'static str),
    /// An underlying I/O operation failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(f, "bad magic value"),
            Error::UnknownTypecode { raw, code } => {
                write!(f, "unknown typecode 0x{raw:02x} (code 0x{code:02x})")
            }
            Error::UnterminatedBstring => write!(f, "bstring missing trailing NUL"),
            Error::VarintTooLong => write!(f, "varint exceeds 10 bytes"),
            Error::TrailingData => write!(f, "trailing data after top-level object"),
            Error::Parse(s) => write!(f, "parse error: {s}"),
            Error::Truncation => write!(f, "unexpected end of file"),
            Error::NotFound(kind) => write!(f, "not found: {kind}"),
            Error::Usage(s) => write!(f, "usage error: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Error::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        // A short `read_exact` surfaces as `UnexpectedEof`; the spec treats
        // that the same as any other truncation, not as a distinct I/O error.
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncation
        } else {
            Error::Io(e)
        }
    }
}
