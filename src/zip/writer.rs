//! Committing an archive: write every live entry to a temporary file next to
//! the target, then rename it over the target.
//!
//! Unchanged entries are copied compressed, byte for byte. New content is
//! deflated, and stored instead when deflating does not make it smaller.

use flate2::Compression;
use flate2::Crc;
use flate2::write::DeflateEncoder;
use std::fs;
use std::io::{self, BufWriter, Write};

use super::engine::{Content, RawArchive, now};
use super::error::{ErrorCode, ZipError, ZipResult};
use super::source::SourceData;
use super::structures::*;

/// Entries above this count need ZIP64, which is not written.
const MAX_ENTRIES: usize = 0xFFFF;

fn write_failed(err: io::Error) -> ZipError {
    ZipError::io(ErrorCode::Write, &err)
}

/// Output position tracking, since `BufWriter` cannot report it cheaply.
struct Counted<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for Counted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compressed payload plus the header fields describing it.
struct Payload {
    method: CompressionMethod,
    crc32: u32,
    uncompressed_size: u64,
    data: Vec<u8>,
    mtime: Option<i64>,
}

fn compress(data: Vec<u8>, mtime: Option<i64>) -> ZipResult<Payload> {
    let mut crc = Crc::new();
    crc.update(&data);

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&data)
        .map_err(|e| ZipError::io(ErrorCode::Zlib, &e))?;
    let deflated = encoder
        .finish()
        .map_err(|e| ZipError::io(ErrorCode::Zlib, &e))?;

    let uncompressed_size = data.len() as u64;
    let (method, data) = if deflated.len() < data.len() {
        (CompressionMethod::Deflate, deflated)
    } else {
        (CompressionMethod::Stored, data)
    };
    Ok(Payload {
        method,
        crc32: crc.sum(),
        uncompressed_size,
        data,
        mtime,
    })
}

fn payload_from(data: SourceData) -> ZipResult<Payload> {
    match data {
        SourceData::Plain { data, mtime } => compress(data, mtime),
        SourceData::Compressed {
            method,
            crc32,
            uncompressed_size,
            data,
            mtime,
        } => Ok(Payload {
            method,
            crc32,
            uncompressed_size,
            data,
            mtime: Some(mtime),
        }),
    }
}

fn new_entry(name: &str, comment: &[u8], payload: &Payload, mtime: i64) -> ZipFileEntry {
    let (date, time) = unix_to_dos(mtime);
    let is_directory = name.ends_with('/');
    let mode: u32 = if is_directory { 0o040755 } else { 0o100644 };
    ZipFileEntry {
        file_name: name.to_string(),
        compression_method: payload.method,
        compressed_size: payload.data.len() as u64,
        uncompressed_size: payload.uncompressed_size,
        crc32: payload.crc32,
        lfh_offset: 0,
        last_mod_time: time,
        last_mod_date: date,
        is_directory,
        flags: 0,
        version_made_by: VERSION_MADE_BY,
        internal_attrs: 0,
        // MS-DOS directory bit in the low byte, unix mode in the high half
        external_attrs: (mode << 16) | if is_directory { 0x10 } else { 0 },
        extra: Vec::new(),
        comment: comment.to_vec(),
    }
}

impl RawArchive {
    /// Write the archive as it currently stands.
    pub(super) fn commit(&self) -> ZipResult<()> {
        let live = self.slots.iter().filter(|s| !s.deleted).count();
        if live > MAX_ENTRIES {
            return Err(ZipError::new(ErrorCode::Inval));
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string())
        );
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&dir)
            .map_err(|e| ZipError::io(ErrorCode::TmpOpen, &e))?;

        // Everything borrowing `temp` has to end before it is persisted
        let written = {
            let mut out = Counted {
                inner: BufWriter::new(temp.as_file()),
                written: 0,
            };
            let mut central = Vec::with_capacity(live);

            for slot in self.slots.iter().filter(|s| !s.deleted) {
                let lfh_offset = out.written;
                let mut header = match (&slot.content, slot.orig) {
                    (Content::Original, Some(orig)) => {
                        let entry = &self.original.entries[orig];
                        let mut header = entry.clone();
                        header.file_name = slot.name.clone();
                        header.comment = slot.comment.clone();
                        header.lfh_offset = lfh_offset;
                        header.write_lfh(&mut out).map_err(write_failed)?;

                        let mut data = self.stored_data(entry)?;
                        let copied = io::copy(&mut data, &mut out).map_err(|e| {
                            if e.kind() == io::ErrorKind::UnexpectedEof {
                                ZipError::new(ErrorCode::Eof)
                            } else {
                                ZipError::io(ErrorCode::Read, &e)
                            }
                        })?;
                        if copied != entry.compressed_size {
                            return Err(ZipError::new(ErrorCode::Eof));
                        }
                        header
                    }
                    (Content::Directory, _) => {
                        let payload = Payload {
                            method: CompressionMethod::Stored,
                            crc32: 0,
                            uncompressed_size: 0,
                            data: Vec::new(),
                            mtime: None,
                        };
                        let mtime = slot.mtime.unwrap_or_else(now);
                        let header = new_entry(&slot.name, &slot.comment, &payload, mtime);
                        header.write_lfh(&mut out).map_err(write_failed)?;
                        header
                    }
                    (Content::Source(source), _) => {
                        let payload = payload_from(source.load()?)?;
                        let mtime = payload
                            .mtime
                            .or(slot.mtime)
                            .unwrap_or_else(now);
                        let header = new_entry(&slot.name, &slot.comment, &payload, mtime);
                        header.write_lfh(&mut out).map_err(write_failed)?;
                        out.write_all(&payload.data).map_err(write_failed)?;
                        header
                    }
                    (Content::Original, None) => return Err(ZipError::new(ErrorCode::Internal)),
                };
                header.lfh_offset = lfh_offset;
                central.push(header);
            }

            let cd_offset = out.written;
            for header in &central {
                header.write_cdfh(&mut out).map_err(write_failed)?;
            }
            let cd_size = out.written - cd_offset;

            let to_u32 = |v: u64| u32::try_from(v).map_err(|_| ZipError::new(ErrorCode::Inval));
            let eocd = EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: central.len() as u16,
                total_entries: central.len() as u16,
                cd_size: to_u32(cd_size)?,
                cd_offset: to_u32(cd_offset)?,
                comment_len: self.comment.len() as u16,
            };
            eocd.write_to(&mut out, &self.comment).map_err(write_failed)?;

            let mut writer = out.inner;
            writer.flush().map_err(write_failed)?;
            let file = writer.into_inner().map_err(|e| write_failed(e.into_error()))?;
            if let Ok(meta) = fs::metadata(&self.path) {
                // Keep the mode of the archive being replaced
                file.set_permissions(meta.permissions())
                    .map_err(write_failed)?;
            }
            file.sync_all().map_err(write_failed)?;
            central.len()
        };

        temp.persist(&self.path)
            .map_err(|e| ZipError::io(ErrorCode::Rename, &e.error))?;
        log::debug!("wrote {} entries to {}", written, self.path.display());
        Ok(())
    }
}
