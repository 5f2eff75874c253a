//! Tail-first ZIP archive parsing and entry decoding.
//!
//! Writing archives is left to the `zip` crate; this module is the read
//! side, and reports where inside a file the archive starts.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: Streaming decode of a single entry into any writer
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Readers locate the EOCD by scanning backwards from the end of the file,
//! so arbitrary bytes may precede the first local header. Offsets stored in
//! the directory are relative to wherever the archive was written; the
//! parser measures the gap between where the central directory claims to
//! be and where it actually is, and shifts every offset by that amount.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED and DEFLATE entries, verified by CRC-32
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

mod extractor;
mod parser;
mod structures;

pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::*;

use thiserror::Error;

/// Failures while decoding archive structures or entry data.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(&'static str),

    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    #[error("entry is encrypted")]
    Encrypted,

    #[error("crc mismatch: expected {expected:08x}, computed {actual:08x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("size mismatch: expected {expected} bytes, decoded {actual}")]
    Size { expected: u64, actual: u64 },
}
