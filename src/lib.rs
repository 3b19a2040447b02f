//! # ziparc
//!
//! Zip archive handles whose derived handles never outlive their archive.
//!
//! An [`Archive`] hands out [`File`] readers and [`Source`] content
//! providers. Each of them is recorded in the archive's registry, and closing
//! the archive (explicitly or by dropping the last reference) forces every one
//! of them closed before the archive is written. A source may also be another
//! archive's entry, in which case the two archives are tied together: the
//! origin stays alive while the target needs it, and closing the origin first
//! closes the target too.
//!
//! ## Features
//!
//! - Create, modify and read zip archives (STORED and DEFLATE)
//! - Archive and entry comments, rename, delete and undo of pending changes
//! - Copying entries between archives, with or without recompression
//! - Reading ZIP64 central directories
//!
//! ## Example
//!
//! ```no_run
//! use ziparc::{Archive, Origin, flags};
//!
//! fn main() -> ziparc::Result<()> {
//!     let archive = Archive::open("notes.zip", flags::CREATE)?;
//!     let source = archive.source(Origin::buffer("hello"))?;
//!     let index = archive.add("hello.txt", &source)?;
//!     archive.close()?;
//!
//!     let archive = Archive::open("notes.zip", 0)?;
//!     let file = archive.open_file(index, 0)?;
//!     assert_eq!(file.read(5)?, b"hello");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod flags;
pub mod handle;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use handle::{Archive, EntryRef, File, Origin, Source, SourceKind, Stat, Strength};
