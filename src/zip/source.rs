//! Pending content descriptors consumed by add/replace.
//!
//! A [`RawSource`] never owns the bytes it describes. Buffers and origin
//! archives are held through `Weak`; whoever creates the descriptor is
//! responsible for keeping them alive until the archive is committed.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::rc::Weak;
use std::time::UNIX_EPOCH;

use super::error::{ErrorCode, ZipError, ZipResult};
use super::structures::CompressionMethod;

/// Anything that can hand out the data of one of its entries.
pub trait EntryProvider {
    /// Data of entry `index` (0-based), windowed by `start`/`len`.
    fn entry_data(&self, index: usize, flags: u32, start: u64, len: Option<u64>)
    -> ZipResult<SourceData>;
}

/// Content loaded from a source at commit time.
#[derive(Debug, Clone)]
pub enum SourceData {
    /// Uncompressed bytes; the writer decides how to store them
    Plain { data: Vec<u8>, mtime: Option<i64> },
    /// Already-compressed bytes copied verbatim
    Compressed {
        method: CompressionMethod,
        crc32: u32,
        uncompressed_size: u64,
        data: Vec<u8>,
        mtime: i64,
    },
}

impl SourceData {
    pub fn mtime(&self) -> Option<i64> {
        match self {
            SourceData::Plain { mtime, .. } => *mtime,
            SourceData::Compressed { mtime, .. } => Some(*mtime),
        }
    }
}

/// A descriptor of where pending entry content comes from.
#[derive(Clone)]
pub enum RawSource {
    Buffer(Weak<[u8]>),
    File {
        path: PathBuf,
        start: u64,
        len: Option<u64>,
    },
    Entry {
        provider: Weak<dyn EntryProvider>,
        index: usize,
        flags: u32,
        start: u64,
        len: Option<u64>,
    },
}

impl std::fmt::Debug for RawSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawSource::Buffer(data) => f
                .debug_tuple("Buffer")
                .field(&data.upgrade().map(|d| d.len()))
                .finish(),
            RawSource::File { path, start, len } => f
                .debug_struct("File")
                .field("path", path)
                .field("start", start)
                .field("len", len)
                .finish(),
            RawSource::Entry {
                index,
                flags,
                start,
                len,
                ..
            } => f
                .debug_struct("Entry")
                .field("index", index)
                .field("flags", flags)
                .field("start", start)
                .field("len", len)
                .finish(),
        }
    }
}

/// Negative lengths mean "until the end".
pub fn window_len(len: i64) -> Option<u64> {
    if len < 0 { None } else { Some(len as u64) }
}

impl RawSource {
    /// Describe a file on disk. The file must exist and the window must fit in it.
    pub fn file(path: impl Into<PathBuf>, start: u64, len: i64) -> ZipResult<Self> {
        let path = path.into();
        let meta = fs::metadata(&path).map_err(|e| ZipError::io(ErrorCode::Open, &e))?;
        if !meta.is_file() {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        let len = window_len(len);
        let end = start.checked_add(len.unwrap_or(0));
        match end {
            Some(end) if start <= meta.len() && end <= meta.len() => {}
            _ => return Err(ZipError::new(ErrorCode::Inval)),
        }
        Ok(RawSource::File { path, start, len })
    }

    /// Load the described content.
    ///
    /// Fails with `ZipClosed` when an origin archive is gone and with
    /// `Internal` when a buffer was released early.
    pub fn load(&self) -> ZipResult<SourceData> {
        match self {
            RawSource::Buffer(data) => {
                let data = data.upgrade().ok_or_else(|| ZipError::new(ErrorCode::Internal))?;
                Ok(SourceData::Plain {
                    data: data.to_vec(),
                    mtime: None,
                })
            }
            RawSource::File { path, start, len } => {
                let mut file =
                    fs::File::open(path).map_err(|e| ZipError::io(ErrorCode::Open, &e))?;
                let meta = file.metadata().map_err(|e| ZipError::io(ErrorCode::Read, &e))?;
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64);

                file.seek(SeekFrom::Start(*start))
                    .map_err(|e| ZipError::io(ErrorCode::Seek, &e))?;
                let mut data = Vec::new();
                match len {
                    Some(len) => {
                        data.resize(*len as usize, 0);
                        file.read_exact(&mut data).map_err(|e| {
                            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                                ZipError::new(ErrorCode::Eof)
                            } else {
                                ZipError::io(ErrorCode::Read, &e)
                            }
                        })?;
                    }
                    None => {
                        file.read_to_end(&mut data)
                            .map_err(|e| ZipError::io(ErrorCode::Read, &e))?;
                    }
                }
                Ok(SourceData::Plain { data, mtime })
            }
            RawSource::Entry {
                provider,
                index,
                flags,
                start,
                len,
            } => {
                let provider = provider
                    .upgrade()
                    .ok_or_else(|| ZipError::new(ErrorCode::ZipClosed))?;
                provider.entry_data(*index, *flags, *start, *len)
            }
        }
    }
}
