//! The archive engine: one open zip file plus its pending changes.
//!
//! Indices here are 0-based. Deleted entries keep their slot until the
//! archive is committed, so indices stay stable while an archive is open.

use flate2::Crc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::flags::{
    CHECKCONS, CREATE, EXCL, FL_COMPRESSED, FL_NOCASE, FL_NODIR, FL_RECOMPRESS, FL_UNCHANGED,
    OPEN_MASK,
};
use crate::io::{LocalFileReader, RangeReader, ReadAt};

use super::error::{ErrorCode, ZipError, ZipResult};
use super::file::RawFile;
use super::parser::{Directory, ZipParser};
use super::source::{RawSource, SourceData};
use super::structures::{CompressionMethod, ZipFileEntry};

/// Largest comment the format can store.
pub const MAX_COMMENT_LEN: usize = 0xFFFF;

const MAX_CAPACITY_HINT: u64 = 64 * 1024;

/// Metadata of one entry as the engine currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    pub name: String,
    pub index: usize,
    pub crc: u32,
    pub size: u64,
    pub mtime: i64,
    /// Unknown until written for content that has not been compressed yet
    pub compressed_size: Option<u64>,
    pub compression_method: Option<u16>,
    pub encryption_method: u16,
}

pub(super) enum Content {
    Original,
    Directory,
    Source(RawSource),
}

pub(super) struct Slot {
    pub(super) orig: Option<usize>,
    pub(super) name: String,
    pub(super) comment: Vec<u8>,
    pub(super) content: Content,
    pub(super) mtime: Option<i64>,
    pub(super) deleted: bool,
}

pub struct RawArchive {
    pub(super) path: PathBuf,
    pub(super) reader: Option<Rc<dyn ReadAt>>,
    pub(super) original: Directory,
    pub(super) slots: Vec<Slot>,
    pub(super) comment: Vec<u8>,
    /// The file did not exist (or was empty) when opened
    pub(super) created: bool,
}

pub(super) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn base_name(name: &str) -> &str {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    match trimmed.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Sizes come from the archive, so they only seed an allocation up to a bound.
fn capacity_hint(size: u64) -> usize {
    size.min(MAX_CAPACITY_HINT) as usize
}

fn crc_of(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

impl RawArchive {
    /// Open or create the archive at `path`.
    pub fn open(path: &Path, flags: u32) -> ZipResult<Self> {
        if flags & !OPEN_MASK != 0 {
            return Err(ZipError::new(ErrorCode::Inval));
        }

        let meta = match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(ZipError::io(ErrorCode::Open, &e)),
        };

        let Some(meta) = meta else {
            if flags & CREATE == 0 {
                return Err(ZipError::new(ErrorCode::NoEnt));
            }
            return Ok(Self::empty(path, true));
        };

        if flags & CREATE != 0 && flags & EXCL != 0 {
            return Err(ZipError::new(ErrorCode::Exists));
        }
        if !meta.is_file() {
            return Err(ZipError::new(ErrorCode::NoZip));
        }

        let reader = LocalFileReader::new(path).map_err(|e| ZipError::io(ErrorCode::Open, &e))?;
        if reader.size() == 0 {
            // An empty file is a fresh archive waiting to be written
            return Ok(Self::empty(path, true));
        }

        let reader: Rc<dyn ReadAt> = Rc::new(reader);
        let parser = ZipParser::new(reader.clone());
        let original = parser.read_directory()?;
        if flags & CHECKCONS != 0 {
            parser.check_consistency(&original)?;
        }

        let slots = original
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| Slot {
                orig: Some(i),
                name: entry.file_name.clone(),
                comment: entry.comment.clone(),
                content: Content::Original,
                mtime: None,
                deleted: false,
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            comment: original.comment.clone(),
            original,
            slots,
            created: false,
        })
    }

    fn empty(path: &Path, created: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            reader: None,
            original: Directory::default(),
            slots: Vec::new(),
            comment: Vec::new(),
            created,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, including ones deleted since opening.
    pub fn num_entries(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> ZipResult<&Slot> {
        self.slots
            .get(index)
            .ok_or_else(|| ZipError::new(ErrorCode::Inval))
    }

    fn live_slot_mut(&mut self, index: usize) -> ZipResult<&mut Slot> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| ZipError::new(ErrorCode::Inval))?;
        if slot.deleted {
            return Err(ZipError::new(ErrorCode::Deleted));
        }
        Ok(slot)
    }

    /// The on-disk record behind `index`, as it was when the archive was opened.
    fn original_entry(&self, index: usize) -> ZipResult<&ZipFileEntry> {
        let orig = self
            .slot(index)?
            .orig
            .ok_or_else(|| ZipError::new(ErrorCode::Inval))?;
        Ok(&self.original.entries[orig])
    }

    /// A slot that may be read under `flags`; deleted entries only with `FL_UNCHANGED`.
    fn readable_slot(&self, index: usize, flags: u32) -> ZipResult<&Slot> {
        let slot = self.slot(index)?;
        if flags & FL_UNCHANGED != 0 {
            if slot.orig.is_none() {
                return Err(ZipError::new(ErrorCode::Inval));
            }
        } else if slot.deleted {
            return Err(ZipError::new(ErrorCode::Deleted));
        }
        Ok(slot)
    }

    fn name_taken(&self, name: &str, except: Option<usize>) -> bool {
        self.slots
            .iter()
            .enumerate()
            .any(|(i, s)| !s.deleted && Some(i) != except && s.name == name)
    }

    pub fn name_locate(&self, name: &str, flags: u32) -> ZipResult<usize> {
        if name.is_empty() {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        let matches = |candidate: &str| {
            let candidate = if flags & FL_NODIR != 0 {
                base_name(candidate)
            } else {
                candidate
            };
            if flags & FL_NOCASE != 0 {
                candidate.eq_ignore_ascii_case(name)
            } else {
                candidate == name
            }
        };

        for (i, slot) in self.slots.iter().enumerate() {
            let candidate = if flags & FL_UNCHANGED != 0 {
                match slot.orig {
                    Some(o) => self.original.entries[o].file_name.as_str(),
                    None => continue,
                }
            } else if slot.deleted {
                continue;
            } else {
                slot.name.as_str()
            };
            if matches(candidate) {
                return Ok(i);
            }
        }
        Err(ZipError::new(ErrorCode::NoEnt))
    }

    pub fn get_name(&self, index: usize, flags: u32) -> ZipResult<String> {
        let slot = self.readable_slot(index, flags)?;
        if flags & FL_UNCHANGED != 0 {
            return Ok(self.original_entry(index)?.file_name.clone());
        }
        Ok(slot.name.clone())
    }

    pub fn stat_index(&self, index: usize, flags: u32) -> ZipResult<EntryStat> {
        let slot = self.readable_slot(index, flags)?;

        if flags & FL_UNCHANGED != 0 || matches!(slot.content, Content::Original) {
            let entry = self.original_entry(index)?;
            let name = if flags & FL_UNCHANGED != 0 {
                entry.file_name.clone()
            } else {
                slot.name.clone()
            };
            return Ok(EntryStat {
                name,
                index,
                crc: entry.crc32,
                size: entry.uncompressed_size,
                mtime: entry.mtime(),
                compressed_size: Some(entry.compressed_size),
                compression_method: Some(entry.compression_method.as_u16()),
                encryption_method: if entry.is_encrypted() { 1 } else { 0 },
            });
        }

        let mtime = slot.mtime.unwrap_or_else(now);
        match &slot.content {
            Content::Directory => Ok(EntryStat {
                name: slot.name.clone(),
                index,
                crc: 0,
                size: 0,
                mtime,
                compressed_size: Some(0),
                compression_method: Some(CompressionMethod::Stored.as_u16()),
                encryption_method: 0,
            }),
            Content::Source(source) => {
                let data = source.load()?;
                let mtime = data.mtime().unwrap_or(mtime);
                let stat = match data {
                    SourceData::Plain { data, .. } => EntryStat {
                        name: slot.name.clone(),
                        index,
                        crc: crc_of(&data),
                        size: data.len() as u64,
                        mtime,
                        compressed_size: None,
                        compression_method: None,
                        encryption_method: 0,
                    },
                    SourceData::Compressed {
                        method,
                        crc32,
                        uncompressed_size,
                        data,
                        ..
                    } => EntryStat {
                        name: slot.name.clone(),
                        index,
                        crc: crc32,
                        size: uncompressed_size,
                        mtime,
                        compressed_size: Some(data.len() as u64),
                        compression_method: Some(method.as_u16()),
                        encryption_method: 0,
                    },
                };
                Ok(stat)
            }
            Content::Original => Err(ZipError::new(ErrorCode::Internal)),
        }
    }

    pub fn archive_comment(&self, flags: u32) -> Option<Vec<u8>> {
        let comment = if flags & FL_UNCHANGED != 0 {
            &self.original.comment
        } else {
            &self.comment
        };
        if comment.is_empty() {
            None
        } else {
            Some(comment.clone())
        }
    }

    pub fn set_archive_comment(&mut self, comment: Option<&[u8]>) -> ZipResult<()> {
        let comment = comment.unwrap_or_default();
        if comment.len() > MAX_COMMENT_LEN {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        self.comment = comment.to_vec();
        Ok(())
    }

    pub fn file_comment(&self, index: usize, flags: u32) -> ZipResult<Option<Vec<u8>>> {
        let slot = self.readable_slot(index, flags)?;
        let comment = if flags & FL_UNCHANGED != 0 {
            &self.original_entry(index)?.comment
        } else {
            &slot.comment
        };
        Ok(if comment.is_empty() {
            None
        } else {
            Some(comment.clone())
        })
    }

    pub fn set_file_comment(&mut self, index: usize, comment: Option<&[u8]>) -> ZipResult<()> {
        let comment = comment.unwrap_or_default();
        if comment.len() > MAX_COMMENT_LEN {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        self.live_slot_mut(index)?.comment = comment.to_vec();
        Ok(())
    }

    fn push_slot(&mut self, name: String, content: Content) -> ZipResult<usize> {
        if name.is_empty() || name.len() > 0xFFFF {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        if self.name_taken(&name, None) {
            return Err(ZipError::new(ErrorCode::Exists));
        }
        self.slots.push(Slot {
            orig: None,
            name,
            comment: Vec::new(),
            content,
            mtime: Some(now()),
            deleted: false,
        });
        Ok(self.slots.len() - 1)
    }

    /// Add a directory entry; a trailing `/` is appended when missing.
    pub fn add_dir(&mut self, name: &str) -> ZipResult<usize> {
        let mut name = name.to_string();
        if !name.ends_with('/') {
            name.push('/');
        }
        if name == "/" {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        self.push_slot(name, Content::Directory)
    }

    pub fn add(&mut self, name: &str, source: RawSource) -> ZipResult<usize> {
        self.push_slot(name.to_string(), Content::Source(source))
    }

    pub fn replace(&mut self, index: usize, source: RawSource) -> ZipResult<()> {
        let slot = self.live_slot_mut(index)?;
        slot.content = Content::Source(source);
        slot.mtime = Some(now());
        Ok(())
    }

    pub fn delete(&mut self, index: usize) -> ZipResult<()> {
        let slot = self.live_slot_mut(index)?;
        slot.deleted = true;
        Ok(())
    }

    pub fn rename(&mut self, index: usize, name: &str) -> ZipResult<()> {
        if name.is_empty() {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        let is_dir = self.live_slot_mut(index)?.name.ends_with('/');
        if is_dir != name.ends_with('/') {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        if self.name_taken(name, Some(index)) {
            return Err(ZipError::new(ErrorCode::Exists));
        }
        self.live_slot_mut(index)?.name = name.to_string();
        Ok(())
    }

    /// Revert every change made to entry `index`.
    pub fn unchange(&mut self, index: usize) -> ZipResult<()> {
        let orig = self
            .slot(index)?
            .orig
            .ok_or_else(|| ZipError::new(ErrorCode::Inval))?;
        let entry = &self.original.entries[orig];
        if self.name_taken(&entry.file_name, Some(index)) {
            return Err(ZipError::new(ErrorCode::Exists));
        }
        let (name, comment) = (entry.file_name.clone(), entry.comment.clone());
        let slot = &mut self.slots[index];
        slot.name = name;
        slot.comment = comment;
        slot.content = Content::Original;
        slot.mtime = None;
        slot.deleted = false;
        Ok(())
    }

    /// Revert every pending change, including added entries and the comment.
    pub fn unchange_all(&mut self) {
        let original_count = self.original.entries.len();
        self.slots.truncate(original_count);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let entry = &self.original.entries[i];
            slot.name = entry.file_name.clone();
            slot.comment = entry.comment.clone();
            slot.content = Content::Original;
            slot.mtime = None;
            slot.deleted = false;
        }
        self.comment = self.original.comment.clone();
    }

    pub fn is_changed(&self) -> bool {
        if self.created || self.comment != self.original.comment {
            return true;
        }
        self.slots.iter().any(|slot| match slot.orig {
            None => true,
            Some(o) => {
                let entry = &self.original.entries[o];
                slot.deleted
                    || !matches!(slot.content, Content::Original)
                    || slot.name != entry.file_name
                    || slot.comment != entry.comment
            }
        })
    }

    fn reader(&self) -> ZipResult<&Rc<dyn ReadAt>> {
        self.reader
            .as_ref()
            .ok_or_else(|| ZipError::new(ErrorCode::Internal))
    }

    /// Window over the stored (possibly compressed) bytes of an original entry.
    ///
    /// The window has to end before the central directory starts.
    pub(super) fn stored_data(&self, entry: &ZipFileEntry) -> ZipResult<RangeReader> {
        let reader = self.reader()?;
        let offset = ZipParser::new(reader.clone()).get_data_offset(entry)?;
        match offset.checked_add(entry.compressed_size) {
            Some(end) if end <= self.original.cd_offset => {}
            _ => return Err(ZipError::new(ErrorCode::Incons)),
        }
        Ok(RangeReader::new(reader.clone(), offset, entry.compressed_size))
    }

    fn open_original(&self, entry: &ZipFileEntry, flags: u32) -> ZipResult<RawFile> {
        if entry.is_encrypted() {
            return Err(ZipError::new(ErrorCode::EncrNotSupp));
        }
        let data = self.stored_data(entry)?;
        if flags & FL_COMPRESSED != 0 {
            return Ok(RawFile::stored(data, None));
        }
        let expected = (entry.crc32, entry.uncompressed_size);
        match entry.compression_method {
            CompressionMethod::Stored => Ok(RawFile::stored(data, Some(expected))),
            CompressionMethod::Deflate => Ok(RawFile::deflated(data, expected)),
            CompressionMethod::Unknown(_) => Err(ZipError::new(ErrorCode::CompNotSupp)),
        }
    }

    /// Open entry `index` for reading.
    pub fn fopen_index(&self, index: usize, flags: u32) -> ZipResult<RawFile> {
        let slot = self.readable_slot(index, flags)?;

        if flags & FL_UNCHANGED != 0 || matches!(slot.content, Content::Original) {
            return self.open_original(self.original_entry(index)?, flags);
        }
        if flags & FL_COMPRESSED != 0 {
            return Err(ZipError::new(ErrorCode::Changed));
        }

        match &slot.content {
            Content::Directory => Ok(RawFile::memory(Vec::new())),
            Content::Source(source) => match source.load()? {
                SourceData::Plain { data, .. } => Ok(RawFile::memory(data)),
                SourceData::Compressed {
                    method,
                    crc32,
                    uncompressed_size,
                    data,
                    ..
                } => {
                    let len = data.len() as u64;
                    let body = RangeReader::new(Rc::new(data), 0, len);
                    match method {
                        CompressionMethod::Stored => {
                            Ok(RawFile::stored(body, Some((crc32, uncompressed_size))))
                        }
                        CompressionMethod::Deflate => {
                            Ok(RawFile::deflated(body, (crc32, uncompressed_size)))
                        }
                        CompressionMethod::Unknown(_) => {
                            Err(ZipError::new(ErrorCode::CompNotSupp))
                        }
                    }
                }
            },
            Content::Original => Err(ZipError::new(ErrorCode::Internal)),
        }
    }

    /// Check that entry `index` can serve as the origin of another archive's source.
    ///
    /// The entry's data must be unchanged (or `FL_UNCHANGED` given) and the
    /// window must lie inside the entry.
    pub fn check_source_entry(
        &self,
        index: usize,
        flags: u32,
        start: u64,
        len: Option<u64>,
    ) -> ZipResult<()> {
        let slot = self.readable_slot(index, flags)?;
        if flags & FL_UNCHANGED == 0 && !matches!(slot.content, Content::Original) {
            return Err(ZipError::new(ErrorCode::Changed));
        }
        let whole = start == 0 && len.is_none();
        if flags & FL_COMPRESSED != 0 && (!whole || flags & FL_RECOMPRESS != 0) {
            return Err(ZipError::new(ErrorCode::Inval));
        }
        let entry = self.original_entry(index)?;
        let end = start.checked_add(len.unwrap_or(0));
        match end {
            Some(end) if start <= entry.uncompressed_size && end <= entry.uncompressed_size => {
                Ok(())
            }
            _ => Err(ZipError::new(ErrorCode::Inval)),
        }
    }

    /// Data of entry `index` for use as another archive's source.
    ///
    /// Whole entries are copied compressed unless `FL_RECOMPRESS` is given;
    /// windows are always decompressed.
    pub fn entry_data(
        &self,
        index: usize,
        flags: u32,
        start: u64,
        len: Option<u64>,
    ) -> ZipResult<SourceData> {
        self.check_source_entry(index, flags, start, len)?;
        let entry = self.original_entry(index)?;
        let whole = start == 0 && len.is_none();

        if whole && flags & FL_RECOMPRESS == 0 && !entry.is_encrypted() {
            let mut reader = self.stored_data(entry)?;
            let mut data = Vec::with_capacity(capacity_hint(entry.compressed_size));
            io::Read::read_to_end(&mut reader, &mut data)
                .map_err(|e| ZipError::io(ErrorCode::Read, &e))?;
            return Ok(SourceData::Compressed {
                method: entry.compression_method,
                crc32: entry.crc32,
                uncompressed_size: entry.uncompressed_size,
                data,
                mtime: entry.mtime(),
            });
        }

        let mut file = self.open_original(entry, flags & !FL_COMPRESSED)?;
        let mut data = Vec::with_capacity(capacity_hint(entry.uncompressed_size));
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        file.close()?;

        let start = start as usize;
        let end = match len {
            Some(len) => start + len as usize,
            None => data.len(),
        };
        Ok(SourceData::Plain {
            data: data[start..end].to_vec(),
            mtime: Some(entry.mtime()),
        })
    }

    /// Write pending changes and release the archive.
    pub fn close(self) -> ZipResult<()> {
        if self.is_changed() {
            self.commit()?;
        }
        Ok(())
    }

    /// Release the archive without writing anything.
    pub fn discard(mut self) {
        self.unchange_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(data: &[u8]) -> (Rc<[u8]>, RawSource) {
        let data: Rc<[u8]> = Rc::from(data);
        let source = RawSource::Buffer(Rc::downgrade(&data));
        (data, source)
    }

    fn read_all(file: &mut RawFile) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = file.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn missing_archive_needs_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.zip");
        assert_eq!(RawArchive::open(&path, 0).err().unwrap().code, ErrorCode::NoEnt);
        let ar = RawArchive::open(&path, CREATE).unwrap();
        assert_eq!(ar.num_entries(), 0);
        assert!(ar.is_changed());
    }

    #[test]
    fn excl_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        RawArchive::open(&path, CREATE).unwrap().close().unwrap();
        let err = RawArchive::open(&path, CREATE | EXCL).err().unwrap();
        assert_eq!(err.code, ErrorCode::Exists);
    }

    #[test]
    fn pending_entries_are_visible_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut ar = RawArchive::open(&dir.path().join("a.zip"), CREATE).unwrap();
        let (_pin, source) = buffer(b"pending data");
        let index = ar.add("docs/Readme.TXT", source).unwrap();

        assert_eq!(ar.name_locate("readme.txt", FL_NOCASE | FL_NODIR).unwrap(), index);
        assert_eq!(ar.name_locate("docs/Readme.TXT", 0).unwrap(), index);
        assert_eq!(ar.name_locate("readme.txt", 0).unwrap_err().code, ErrorCode::NoEnt);

        let stat = ar.stat_index(index, 0).unwrap();
        assert_eq!(stat.size, 12);
        assert_eq!(stat.compressed_size, None);

        let mut file = ar.fopen_index(index, 0).unwrap();
        assert_eq!(read_all(&mut file), b"pending data");
        assert_eq!(
            ar.fopen_index(index, FL_COMPRESSED).err().unwrap().code,
            ErrorCode::Changed
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ar = RawArchive::open(&dir.path().join("a.zip"), CREATE).unwrap();
        ar.add_dir("sub").unwrap();
        assert_eq!(ar.add_dir("sub/").unwrap_err().code, ErrorCode::Exists);
        let (_pin, source) = buffer(b"x");
        assert_eq!(ar.add("sub/", source).unwrap_err().code, ErrorCode::Exists);
    }

    #[test]
    fn deleted_entries_keep_their_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut ar = RawArchive::open(&dir.path().join("a.zip"), CREATE).unwrap();
        let (_a, source_a) = buffer(b"a");
        let (_b, source_b) = buffer(b"b");
        ar.add("a", source_a).unwrap();
        let b = ar.add("b", source_b).unwrap();
        ar.delete(0).unwrap();

        assert_eq!(ar.num_entries(), 2);
        assert_eq!(ar.stat_index(0, 0).unwrap_err().code, ErrorCode::Deleted);
        assert_eq!(ar.get_name(b, 0).unwrap(), "b");
        assert_eq!(ar.name_locate("a", 0).unwrap_err().code, ErrorCode::NoEnt);
    }

    /// A single stored entry whose central record carries ZIP64 sizes.
    fn write_zip64_entry(path: &Path, compressed: u64, uncompressed: u64) {
        use crate::zip::structures::EndOfCentralDirectory;
        use byteorder::{LittleEndian, WriteBytesExt};

        let data = b"tiny";
        let mut extra = Vec::new();
        extra.write_u16::<LittleEndian>(0x0001).unwrap();
        extra.write_u16::<LittleEndian>(16).unwrap();
        extra.write_u64::<LittleEndian>(uncompressed).unwrap();
        extra.write_u64::<LittleEndian>(compressed).unwrap();
        let entry = ZipFileEntry {
            file_name: "big".to_string(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 0xFFFFFFFF,
            uncompressed_size: 0xFFFFFFFF,
            crc32: crc_of(data),
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0x21,
            is_directory: false,
            flags: 0,
            version_made_by: 20,
            internal_attrs: 0,
            external_attrs: 0,
            extra,
            comment: Vec::new(),
        };

        let mut out = Vec::new();
        entry.write_lfh(&mut out).unwrap();
        out.extend_from_slice(data);
        let cd_offset = out.len();
        entry.write_cdfh(&mut out).unwrap();
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 1,
            total_entries: 1,
            cd_size: (out.len() - cd_offset) as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        };
        eocd.write_to(&mut out, b"").unwrap();
        fs::write(path, out).unwrap();
    }

    #[test]
    fn oversized_entries_fail_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.zip");
        write_zip64_entry(&path, 1 << 63, 1 << 63);
        let ar = RawArchive::open(&path, 0).unwrap();

        assert_eq!(ar.stat_index(0, 0).unwrap().size, 1 << 63);
        assert!(ar.check_source_entry(0, 0, 0, None).is_ok());
        assert_eq!(ar.entry_data(0, 0, 0, None).unwrap_err().code, ErrorCode::Incons);
        assert_eq!(
            ar.entry_data(0, FL_RECOMPRESS, 0, None).unwrap_err().code,
            ErrorCode::Incons
        );
        assert_eq!(ar.fopen_index(0, 0).err().unwrap().code, ErrorCode::Incons);
    }

    #[test]
    fn short_data_behind_a_large_size_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.zip");
        write_zip64_entry(&path, 4, 1 << 63);
        let ar = RawArchive::open(&path, 0).unwrap();

        match ar.entry_data(0, 0, 0, None).unwrap() {
            SourceData::Compressed { data, .. } => assert_eq!(data, b"tiny"),
            SourceData::Plain { .. } => panic!("whole entries are copied as stored"),
        }
        assert_eq!(
            ar.entry_data(0, FL_RECOMPRESS, 0, None).unwrap_err().code,
            ErrorCode::Eof
        );
    }

    #[test]
    fn comments_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut ar = RawArchive::open(&dir.path().join("a.zip"), CREATE).unwrap();
        let long = vec![b'x'; MAX_COMMENT_LEN + 1];
        assert_eq!(ar.set_archive_comment(Some(&long)).unwrap_err().code, ErrorCode::Inval);
        ar.set_archive_comment(Some(b"hi")).unwrap();
        assert_eq!(ar.archive_comment(0), Some(b"hi".to_vec()));
        assert_eq!(ar.archive_comment(FL_UNCHANGED), None);
        ar.set_archive_comment(None).unwrap();
        assert_eq!(ar.archive_comment(0), None);
    }
}
