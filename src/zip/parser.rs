//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data

use std::io::Cursor;
use std::rc::Rc;

use crate::io::ReadAt;

use super::error::{ErrorCode, ZipError, ZipResult};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// The parsed central directory of an archive.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub entries: Vec<ZipFileEntry>,
    pub comment: Vec<u8>,
    /// Offset where the central directory starts; entry data lies before it
    pub cd_offset: u64,
}

/// Low-level ZIP file parser.
///
/// Reads and parses ZIP structures from a shared data source. The same
/// source is later handed to entry readers, so it is reference counted.
pub struct ZipParser {
    /// The underlying data source
    reader: Rc<dyn ReadAt>,
    /// Total size of the archive in bytes
    size: u64,
}

fn read_failed(err: std::io::Error) -> ZipError {
    ZipError::io(ErrorCode::Read, &err)
}

impl ZipParser {
    pub fn new(reader: Rc<dyn ReadAt>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record, its offset, and the archive comment that follows it.
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64, Vec<u8>)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::new(ErrorCode::NoZip));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).map_err(read_failed)?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset, Vec::new()));
        }

        // EOCD not at expected location - search backwards, it sits
        // before a comment of at most MAX_COMMENT_SIZE bytes.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader
            .read_exact_at(search_start, &mut buf)
            .map_err(read_failed)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                let comment_start = i + EndOfCentralDirectory::SIZE;

                if comment_len == buf.len() - comment_start {
                    let eocd = EndOfCentralDirectory::from_bytes(&buf[i..comment_start])?;
                    let comment = buf[comment_start..].to_vec();
                    return Ok((eocd, search_start + i as u64, comment));
                }
            }
        }

        Err(ZipError::new(ErrorCode::NoZip))
    }

    /// Read the ZIP64 End of Central Directory record.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> ZipResult<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| ZipError::new(ErrorCode::Incons))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .map_err(read_failed)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.total_disks > 1 {
            return Err(ZipError::new(ErrorCode::MultiDisk));
        }

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .map_err(read_failed)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Read the whole central directory.
    pub fn read_directory(&self) -> ZipResult<Directory> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;
        if eocd.is_multi_disk() {
            return Err(ZipError::new(ErrorCode::MultiDisk));
        }

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset
            || total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size
        {
            return Err(ZipError::new(ErrorCode::Incons));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader
            .read_exact_at(cd_offset, &mut cd_data)
            .map_err(read_failed)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..total_entries {
            entries.push(ZipFileEntry::parse_cdfh(&mut cursor)?);
        }

        Ok(Directory {
            entries,
            comment,
            cd_offset,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header has variable-length fields that may differ from
    /// the Central Directory entry, so the header itself has to be read.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> ZipResult<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .map_err(read_failed)?;

        let (name_len, extra_len) = parse_lfh_lengths(&lfh_buf)?;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + name_len as u64 + extra_len as u64)
    }

    /// Cross-check every entry against its local header.
    ///
    /// Local headers must exist, carry the same name as the central record,
    /// and the entry data must end before the central directory starts.
    pub fn check_consistency(&self, directory: &Directory) -> ZipResult<()> {
        for entry in &directory.entries {
            let mut lfh_buf = vec![0u8; LFH_SIZE];
            self.reader
                .read_exact_at(entry.lfh_offset, &mut lfh_buf)
                .map_err(|_| ZipError::new(ErrorCode::Incons))?;
            let (name_len, extra_len) = parse_lfh_lengths(&lfh_buf)?;

            let mut name = vec![0u8; name_len as usize];
            self.reader
                .read_exact_at(entry.lfh_offset + LFH_SIZE as u64, &mut name)
                .map_err(|_| ZipError::new(ErrorCode::Incons))?;
            if String::from_utf8_lossy(&name) != entry.file_name {
                return Err(ZipError::new(ErrorCode::Incons));
            }

            let data_end = entry.lfh_offset
                + LFH_SIZE as u64
                + name_len as u64
                + extra_len as u64
                + entry.compressed_size;
            if data_end > directory.cd_offset {
                return Err(ZipError::new(ErrorCode::Incons));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_archive(comment: &[u8]) -> Vec<u8> {
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 0,
            total_entries: 0,
            cd_size: 0,
            cd_offset: 0,
            comment_len: comment.len() as u16,
        };
        let mut out = Vec::new();
        eocd.write_to(&mut out, comment).unwrap();
        out
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let parser = ZipParser::new(Rc::new(empty_archive(b"hello there")));
        let directory = parser.read_directory().unwrap();
        assert!(directory.entries.is_empty());
        assert_eq!(directory.comment, b"hello there");
    }

    #[test]
    fn rejects_non_zip_data() {
        let parser = ZipParser::new(Rc::new(b"definitely not a zip archive".to_vec()));
        let err = parser.read_directory().unwrap_err();
        assert_eq!(err.code, ErrorCode::NoZip);
    }
}
