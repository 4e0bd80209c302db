//! Error types for archive indexing and reads.
//!
//! Errors are split by layer:
//!
//! - [`StoreError`]: the backing store failed or returned a block of the wrong geometry.  These are
//!   always fatal for the operation in flight and are never retried.
//! - [`DecodeError`]: a header that carries the tar magic is malformed.  During indexing this
//!   truncates the archive at that header instead of failing the open.
//! - [`Error`]: what the public [`Archive`](crate::Archive) surface returns.
//!
//! "Not found" and "end of archive" are not errors: lookups return `Option` and header decoding
//! returns `Ok(None)` for a block without the tar magic.

use std::io;

use thiserror::Error;

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the block-addressable backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store reported an error while fetching a block.
    #[error("failed to fetch block {block}: {source}")]
    Fetch {
        /// The block number being fetched.
        block: u64,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The store returned a block whose size does not match its declared block size.
    #[error("block {block} has {actual} bytes, expected {expected}")]
    BlockSize {
        /// The block number being fetched.
        block: u64,
        /// The store's declared block size.
        expected: usize,
        /// The size of the block actually returned.
        actual: usize,
    },

    /// The store reports a block size of zero.
    #[error("store has a block size of zero")]
    ZeroBlockSize,

    /// A read touched a block past the end of the store.
    #[error("block {block} is past the end of the store ({count} blocks)")]
    OutOfRange {
        /// The block number that was requested.
        block: u64,
        /// Number of blocks in the store.
        count: u64,
    },

    /// The requested byte range does not fit in a 64-bit offset.
    #[error("read of {length} bytes at offset {offset} overflows")]
    Overflow {
        /// Start of the requested range.
        offset: u64,
        /// Length of the requested range.
        length: usize,
    },
}

/// A header with valid tar magic that cannot be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A mandatory numeric field is not a valid octal (or base-256) number.
    #[error("invalid {field} field: {raw:?}")]
    InvalidNumber {
        /// Name of the header field.
        field: &'static str,
        /// The field contents, lossily converted for display.
        raw: String,
    },

    /// The stored checksum does not match the header contents.
    #[error(
        "checksum mismatch: stored {}, computed {computed}",
        .expected.map_or_else(|| "unparsable".to_string(), |sum| sum.to_string())
    )]
    ChecksumMismatch {
        /// The checksum stored in the header, if it could be parsed.
        expected: Option<u64>,
        /// The checksum computed over the header bytes.
        computed: u64,
    },

    /// The declared payload extends past the end of the backing store.
    #[error("payload of {length} bytes at offset {data_offset} runs past the end of the store ({store_len} bytes)")]
    PayloadPastEnd {
        /// Offset of the payload in the store.
        data_offset: u64,
        /// Declared payload length.
        length: u64,
        /// Total size of the store in bytes.
        store_len: u64,
    },
}

impl DecodeError {
    pub(crate) fn invalid_number(field: &'static str, raw: &[u8]) -> Self {
        DecodeError::InvalidNumber {
            field,
            raw: String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

/// Errors returned by [`Archive`](crate::Archive) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing store could not be read.
    #[error("backing store error: {0}")]
    Store(#[from] StoreError),

    /// A header could not be decoded and the archive was opened in strict mode.
    #[error("malformed header at offset {offset}: {source}")]
    Decode {
        /// Offset of the offending header in the store.
        offset: u64,
        /// What was wrong with it.
        #[source]
        source: DecodeError,
    },
}
