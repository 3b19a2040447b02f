//! The archive engine.
//!
//! A self-contained zip reader/writer with a small, libzip-shaped interface:
//! open an archive, query and edit its entries, open entries for reading,
//! then either commit the pending changes or discard them. Failures are
//! reported as [`ZipError`] status codes.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (EOCD, central and local headers)
//! - [`parser`]: reading the central directory from a [`ReadAt`](crate::io::ReadAt) source
//! - [`engine`]: the open archive and its pending changes
//! - [`source`]: descriptors of content waiting to be written
//! - [`file`]: read cursors over entry data
//! - `writer`: committing an archive to disk
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE entries, archive and entry comments
//! - Reading ZIP64 central directories
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No ZIP64 output (4 GiB / 65535 entries per archive)

pub mod engine;
pub mod error;
pub mod file;
pub mod parser;
pub mod source;
pub mod structures;
mod writer;

pub use engine::{EntryStat, RawArchive};
pub use error::{ErrorCode, ZipError, ZipResult, error_to_str};
pub use file::RawFile;
pub use parser::{Directory, ZipParser};
pub use source::{EntryProvider, RawSource, SourceData};
pub use structures::{CompressionMethod, ZipFileEntry};
