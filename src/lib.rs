//! # zipglot
//!
//! Build polyglot files that end in a ZIP archive, and inspect or edit ZIP
//! archives (polyglot or plain).
//!
//! ZIP readers locate an archive from the end of the file, so any bytes
//! placed in front of it are ignored by them. A polyglot is therefore a
//! primary file (an image, a PDF, an interpreter stub) followed by a
//! complete archive.
//!
//! ## Features
//!
//! - Build deflate-compressed payloads from `(name, path)` pairs
//! - Append a payload to a primary file, or to an encoded script stub
//! - List, locate and extract entries, skipping any polyglot prefix
//! - Delete entries with an atomic rewrite that keeps the prefix
//! - Support for ZIP64 records and STORED/DEFLATE entries
//! - Zip-slip protection on extraction
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use zipglot::payload::{self, PayloadEntry};
//! use zipglot::{inspect, polyglot};
//!
//! fn main() -> zipglot::Result<()> {
//!     let payload = payload::build(&[PayloadEntry::new("notes.txt", "notes.txt")])?;
//!     polyglot::write_append(Path::new("cover.jpg"), &payload, Path::new("out.jpg"))?;
//!
//!     for entry in inspect::list_entries(Path::new("out.jpg"))? {
//!         println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod edit;
pub mod error;
pub mod inspect;
pub mod io;
pub mod payload;
pub mod polyglot;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use self::io::{LocalFileReader, ReadAt};
pub use self::zip::{ArchiveLayout, ZipExtractor, ZipFileEntry};
