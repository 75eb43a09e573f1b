//! Errors produced while decoding or encoding MMDB files.

use thiserror::Error;

/// Everything that can go wrong reading or writing an MMDB file.
///
/// All variants are fatal to the operation in progress; there is no
/// meaningful retry on a corrupt buffer, so callers should treat any of
/// these as "this file/value is unusable" rather than something to paper
/// over.
#[derive(Debug, Error)]
pub enum MmdbError {
    /// The rightmost metadata magic (`\xAB\xCD\xEF MaxMind.com`) wasn't found
    /// anywhere in the file.
    #[error("no metadata section found in file")]
    NoMetadata,

    /// A control byte's type tag resolved to something outside `1..=15`.
    #[error("unknown value type tag {0}")]
    UnknownTypeTag(u8),

    /// Tag 12 (data cache container) or 13 (end marker): reserved, never
    /// produced by this writer, rejected on read.
    #[error("reserved type tag {0} encountered")]
    ReservedTag(u8),

    /// Tag 8 (int32). No known encoder emits it in practice.
    #[error("int32 values are not implemented")]
    Int32Unimplemented,

    /// A UTF-8 string value contained invalid UTF-8.
    #[error("invalid UTF-8 in string value: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The buffer ended before a value's declared length could be satisfied.
    #[error("truncated value: needed {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },

    /// `record_size` computed as 28 or chosen via metadata was neither 24,
    /// 28, nor 32.
    #[error("unsupported record size {0} (must be 24, 28, or 32)")]
    UnsupportedRecordSize(u16),

    /// The tree grew past what a 32-bit record can address.
    #[error("record size would need {bits} bits, but 32 is the maximum")]
    RecordSizeOverflow { bits: u32 },

    /// A value-header length would need a fourth length-extension byte.
    #[error("value length {0} is too large to encode (max 16843035)")]
    HeaderLengthOverflow(u64),

    /// An unsigned integer value didn't fit in its type's declared width.
    #[error("{ty} value does not fit in {max} bytes (needed {len})")]
    IntegerTooWide {
        ty: &'static str,
        len: usize,
        max: usize,
    },

    /// A pointer payload was computed as $\geq 2^{32}$.
    #[error("pointer value {0} exceeds the maximum representable pointer")]
    PointerOverflow(u64),

    /// A tree-record child index fell outside `[0, node_count]` for a
    /// sibling/null slot, or pointed past the end of the data section for a
    /// leaf slot.
    #[error("child index {0} out of range for this tree")]
    UnexpectedChild(u32),

    /// The writer was asked to serialize a `Value` variant it doesn't
    /// support (used by collaborators extending the grammar).
    #[error("cannot serialize value of type {0}")]
    Unserializable(&'static str),

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type MmdbResult<T> = Result<T, MmdbError>;
