//! Error types for ELF parsing and runpath rewriting.
//!
//! Every variant names the structural reason a rewrite was refused so the
//! caller can report it instead of shipping a silently broken object.

use thiserror::Error;

/// Errors raised while reading or rewriting an ELF object.
#[derive(Debug, Error)]
pub enum RpathError {
    /// The input does not start with the ELF magic bytes.
    #[error("not an ELF object (magic {magic:02x?})")]
    NotElf {
        /// The first bytes of the input, for diagnostics.
        magic: Vec<u8>,
    },

    /// The ELF class byte is neither 32-bit nor 64-bit.
    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),

    /// The ELF data encoding byte is neither little- nor big-endian.
    #[error("unsupported ELF data encoding {0}")]
    UnsupportedEncoding(u8),

    /// A header or table extends past the end of the input.
    #[error("truncated ELF object: {what} at offset {offset} needs {len} bytes")]
    Truncated {
        /// The structure being read.
        what: &'static str,
        /// File offset of the read.
        offset: u64,
        /// Number of bytes required.
        len: u64,
    },

    /// A header field holds a value the rewriter cannot work with.
    #[error("malformed ELF object: {0}")]
    Malformed(String),

    /// The object has no `PT_DYNAMIC` segment, so it has no runpath to set.
    #[error("object has no dynamic segment")]
    NotDynamic,

    /// The dynamic section lacks `DT_STRTAB` or `DT_STRSZ`.
    #[error("dynamic section has no string table")]
    MissingStringTable,

    /// A virtual address is not backed by any loadable segment.
    #[error("virtual address {0:#x} is not mapped by any PT_LOAD segment")]
    UnmappedAddress(u64),

    /// A value does not fit the object's word size.
    #[error("{what} value {value:#x} does not fit a 32-bit ELF field")]
    SizeOverflow {
        /// The field being written.
        what: &'static str,
        /// The value that overflowed.
        value: u64,
    },

    /// The requested runpath is empty or contains a NUL byte.
    #[error("invalid runpath {0:?}")]
    InvalidRunpath(String),

    /// Reading back the rewritten object did not yield the requested runpath.
    #[error("runpath read back as {actual:?}, expected {expected:?}")]
    ReadBackMismatch {
        /// The runpath that was requested.
        expected: String,
        /// The runpath that was found after rewriting.
        actual: Option<String>,
    },

    /// An I/O operation on the object file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`RpathError`].
pub type Result<T> = std::result::Result<T, RpathError>;
