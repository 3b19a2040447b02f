//! The archive handle.
//!
//! An [`Archive`] owns one engine archive and the registry of every file and
//! source handle issued from it. Closing the archive, explicitly or by
//! dropping its last reference, first forces all of those children closed
//! and only then commits (or discards) the engine archive.
//!
//! Indices are 1-based here and 0-based in the engine; every call site goes
//! through [`ArchiveCell::engine_index`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::flags::{ENTRY_MASK, OPEN_MASK};
use crate::zip::{ErrorCode, EntryProvider, RawArchive, RawSource, SourceData, ZipResult};

use super::file::{File, FileCell};
use super::registry::{Child, ChildId, ChildKind, ChildRegistry, Strength, next_child_id, reaches};
use super::source::{Origin, Source, SourceCell, SourceKind};

/// Metadata of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    /// 1-based
    pub index: u64,
    pub crc: u32,
    pub size: u64,
    /// Seconds since the unix epoch
    pub mtime: i64,
    /// `None` for content that has not been compressed yet
    pub compressed_size: Option<u64>,
    pub compression_method: Option<u16>,
    pub encryption_method: u16,
}

/// An entry named either by 1-based index or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef<'a> {
    Index(u64),
    Name(&'a str),
}

impl From<u64> for EntryRef<'_> {
    fn from(index: u64) -> Self {
        EntryRef::Index(index)
    }
}

impl<'a> From<&'a str> for EntryRef<'a> {
    fn from(name: &'a str) -> Self {
        EntryRef::Name(name)
    }
}

impl<'a> From<&'a String> for EntryRef<'a> {
    fn from(name: &'a String) -> Self {
        EntryRef::Name(name.as_str())
    }
}

pub(crate) struct ArchiveCell {
    id: ChildId,
    path: PathBuf,
    /// `None` once closed
    raw: RefCell<Option<RawArchive>>,
    registry: RefCell<ChildRegistry>,
    /// Entry sources per origin archive that are pending or were added
    origin_uses: RefCell<BTreeMap<ChildId, usize>>,
}

/// An open zip archive.
///
/// Cloning yields another reference to the same archive. The archive is
/// finalized (pending changes discarded) when the last reference, including
/// the ones held by other archives using it as a source, is dropped.
#[derive(Clone)]
pub struct Archive {
    cell: Rc<ArchiveCell>,
}

fn check_entry_flags(flags: u32) -> Result<()> {
    if flags & !ENTRY_MASK != 0 {
        return Err(Error::Argument(format!("unknown entry flags {:#x}", flags)));
    }
    Ok(())
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Archive {
    /// Open or create the archive at `path`.
    pub fn open(path: impl AsRef<Path>, flags: u32) -> Result<Archive> {
        let path = path.as_ref();
        if flags & !OPEN_MASK != 0 {
            return Err(Error::Argument(format!("unknown open flags {:#x}", flags)));
        }
        let raw = RawArchive::open(path, flags).map_err(Error::open)?;
        let cell = Rc::new(ArchiveCell {
            id: next_child_id(),
            path: path.to_path_buf(),
            raw: RefCell::new(Some(raw)),
            registry: RefCell::new(ChildRegistry::new()),
            origin_uses: RefCell::new(BTreeMap::new()),
        });
        log::debug!("opened archive #{} at {}", cell.id, path.display());
        Ok(Archive { cell })
    }

    /// Force every issued file and source closed, then commit pending changes.
    ///
    /// The archive is closed even when the commit fails. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        self.cell.close()
    }

    pub fn is_closed(&self) -> bool {
        self.cell.raw.borrow().is_none()
    }

    pub fn path(&self) -> &Path {
        &self.cell.path
    }

    /// Number of entries, counting entries deleted since opening.
    pub fn num_files(&self) -> Result<u64> {
        self.cell.with_raw(|raw| Ok(raw.num_entries() as u64))
    }

    /// 1-based index of the entry called `name`.
    pub fn name_locate(&self, name: &str, flags: u32) -> Result<u64> {
        check_entry_flags(flags)?;
        self.cell.with_raw(|raw| locate(raw, name, flags))
    }

    pub fn stat<'a>(&self, entry: impl Into<EntryRef<'a>>, flags: u32) -> Result<Stat> {
        check_entry_flags(flags)?;
        let entry = entry.into();
        self.cell.with_raw(|raw| {
            let index = resolve(raw, entry, flags)?;
            let stat = raw.stat_index(index, flags).map_err(Error::operation)?;
            Ok(Stat {
                name: stat.name,
                index: stat.index as u64 + 1,
                crc: stat.crc,
                size: stat.size,
                mtime: stat.mtime,
                compressed_size: stat.compressed_size,
                compression_method: stat.compression_method,
                encryption_method: stat.encryption_method,
            })
        })
    }

    pub fn get_name(&self, index: u64, flags: u32) -> Result<String> {
        check_entry_flags(flags)?;
        self.cell.with_raw(|raw| {
            let index = engine_index(raw, index)?;
            raw.get_name(index, flags).map_err(Error::operation)
        })
    }

    /// The archive comment; `None` when there is none.
    pub fn comment(&self, flags: u32) -> Result<Option<String>> {
        check_entry_flags(flags)?;
        self.cell
            .with_raw(|raw| Ok(raw.archive_comment(flags).map(text)))
    }

    /// Set or (with `None`) remove the archive comment.
    pub fn set_comment(&self, comment: Option<&str>) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            raw.set_archive_comment(comment.map(str::as_bytes))
                .map_err(Error::operation)
        })
    }

    pub fn file_comment(&self, index: u64, flags: u32) -> Result<Option<String>> {
        check_entry_flags(flags)?;
        self.cell.with_raw(|raw| {
            let index = engine_index(raw, index)?;
            raw.file_comment(index, flags)
                .map(|comment| comment.map(text))
                .map_err(Error::operation)
        })
    }

    pub fn set_file_comment(&self, index: u64, comment: Option<&str>) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            let index = engine_index(raw, index)?;
            raw.set_file_comment(index, comment.map(str::as_bytes))
                .map_err(Error::operation)
        })
    }

    /// Add a directory entry, returning its 1-based index.
    pub fn add_directory(&self, name: &str) -> Result<u64> {
        self.cell.with_raw_mut(|raw| {
            raw.add_dir(name)
                .map(|index| index as u64 + 1)
                .map_err(Error::operation)
        })
    }

    pub fn delete(&self, index: u64) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            let index = engine_index(raw, index)?;
            raw.delete(index).map_err(Error::operation)
        })
    }

    pub fn rename(&self, index: u64, name: &str) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            let index = engine_index(raw, index)?;
            raw.rename(index, name).map_err(Error::operation)
        })
    }

    /// Revert all pending changes to one entry.
    pub fn unchange(&self, index: u64) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            let index = engine_index(raw, index)?;
            raw.unchange(index).map_err(Error::operation)
        })
    }

    /// Revert every pending change to the archive.
    pub fn unchange_all(&self) -> Result<()> {
        self.cell.with_raw_mut(|raw| {
            raw.unchange_all();
            Ok(())
        })
    }

    /// Build a source whose content will be written into this archive.
    ///
    /// Buffers are pinned by this archive until it closes. An entry of another
    /// archive pins that archive instead, and makes this archive a dependent
    /// of it: closing the origin first closes this archive too.
    pub fn source(&self, origin: Origin<'_>) -> Result<Source> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        match origin {
            Origin::Buffer(bytes) => {
                let data: Rc<[u8]> = Rc::from(bytes);
                let raw = RawSource::Buffer(Rc::downgrade(&data));
                let cell = SourceCell::new(SourceKind::Buffer, &self.cell, raw, Some(data), None);
                self.cell.register(&cell, Strength::Strong);
                Ok(Source::from_cell(cell))
            }
            Origin::Path { path, start, len } => {
                let raw = RawSource::file(path, start, len).map_err(Error::operation)?;
                let cell = SourceCell::new(SourceKind::Path, &self.cell, raw, None, None);
                self.cell.register(&cell, Strength::Weak);
                Ok(Source::from_cell(cell))
            }
            Origin::Entry {
                archive,
                index,
                flags,
                start,
                len,
            } => self.entry_source(archive, index, flags, start, len),
        }
    }

    fn entry_source(
        &self,
        origin: &Archive,
        index: u64,
        flags: u32,
        start: u64,
        len: i64,
    ) -> Result<Source> {
        check_entry_flags(flags)?;
        if origin.is_closed() {
            return Err(Error::Closed);
        }
        let circular = {
            let registry = self.cell.registry.borrow();
            origin.cell.id == self.cell.id
                || registry.contains_weak(origin.cell.id)
                || reaches(registry.weak_archives(), origin.cell.id)
        };
        if circular {
            return Err(Error::CircularReference);
        }

        let window = crate::zip::source::window_len(len);
        let index = origin.cell.with_raw(|raw| {
            let index = engine_index(raw, index)?;
            raw.check_source_entry(index, flags, start, window)
                .map_err(Error::operation)?;
            Ok(index)
        })?;

        let provider = Rc::downgrade(&origin.cell);
        let provider: Weak<dyn EntryProvider> = provider;
        let raw = RawSource::Entry {
            provider,
            index,
            flags,
            start,
            len: window,
        };

        let origin_child: Rc<dyn Child> = origin.cell.clone();
        let target_child: Rc<dyn Child> = self.cell.clone();
        self.cell
            .registry
            .borrow_mut()
            .register(&origin_child, Strength::Strong);
        origin
            .cell
            .registry
            .borrow_mut()
            .register(&target_child, Strength::Weak);
        *self
            .cell
            .origin_uses
            .borrow_mut()
            .entry(origin.cell.id)
            .or_insert(0) += 1;

        let cell = SourceCell::new(SourceKind::Entry, &self.cell, raw, None, Some(&origin.cell));
        self.cell.register(&cell, Strength::Weak);
        log::debug!(
            "archive #{} now sources entry {} of archive #{}",
            self.cell.id,
            index,
            origin.cell.id
        );
        Ok(Source::from_cell(cell))
    }

    /// Add `source` as a new entry called `name`, returning its 1-based index.
    pub fn add(&self, name: &str, source: &Source) -> Result<u64> {
        let raw = self.consume(source)?;
        let added = self.cell.with_raw_mut(|engine| {
            engine
                .add(name, raw)
                .map(|index| index as u64 + 1)
                .map_err(Error::operation)
        });
        self.settle(source, added)
    }

    /// Replace the content of entry `index` with `source`.
    pub fn replace(&self, index: u64, source: &Source) -> Result<u64> {
        // Reject bad indices before the source is used up
        self.cell.with_raw(|raw| engine_index(raw, index).map(|_| ()))?;
        let raw = self.consume(source)?;
        let replaced = self.cell.with_raw_mut(|engine| {
            let zero_based = engine_index(engine, index)?;
            engine
                .replace(zero_based, raw)
                .map(|()| index)
                .map_err(Error::operation)
        });
        self.settle(source, replaced)
    }

    /// Take the engine descriptor out of a source built for this archive.
    fn consume(&self, source: &Source) -> Result<RawSource> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if !source.cell.belongs_to(&self.cell) {
            return Err(Error::Argument(
                "source was built for a different archive".into(),
            ));
        }
        let raw = source.cell.take()?;
        self.cell.register(&source.cell, Strength::Strong);
        Ok(raw)
    }

    /// On failure the source is released; on success it stays pinned until close.
    fn settle(&self, source: &Source, outcome: Result<u64>) -> Result<u64> {
        if outcome.is_err() {
            source.cell.release();
        }
        outcome
    }

    /// Open an entry for reading.
    pub fn open_file<'a>(&self, entry: impl Into<EntryRef<'a>>, flags: u32) -> Result<File> {
        check_entry_flags(flags)?;
        let entry = entry.into();
        let (raw_file, name) = self.cell.with_raw(|raw| {
            let index = resolve(raw, entry, flags)?;
            let file = raw.fopen_index(index, flags).map_err(Error::operation)?;
            let name = raw.get_name(index, flags).map_err(Error::operation)?;
            Ok((file, name))
        })?;
        let cell = FileCell::new(&self.cell, raw_file, name);
        self.cell.register(&cell, Strength::Weak);
        Ok(File::from_cell(cell))
    }

    /// Number of handles currently registered with this archive.
    pub fn registered_handles(&self) -> usize {
        self.cell.registry.borrow().len()
    }

    /// Registry entries including Weak ones whose handle is gone.
    #[cfg(test)]
    pub(crate) fn recorded_handles(&self) -> usize {
        self.cell.registry.borrow().recorded()
    }

    #[cfg(test)]
    pub(crate) fn strength_of(&self, other: &Archive) -> Option<Strength> {
        self.cell.registry.borrow().strength_of(other.cell.id)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("id", &self.cell.id)
            .field("path", &self.cell.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Convert a public 1-based index to the engine's 0-based one.
fn engine_index(raw: &RawArchive, index: u64) -> Result<usize> {
    if index == 0 {
        return Err(Error::Argument("entry indices start at 1".into()));
    }
    if index > raw.num_entries() as u64 {
        return Err(Error::NotFound(format!("index {}", index)));
    }
    Ok((index - 1) as usize)
}

fn locate(raw: &RawArchive, name: &str, flags: u32) -> Result<u64> {
    match raw.name_locate(name, flags) {
        Ok(index) => Ok(index as u64 + 1),
        Err(err) if err.code == ErrorCode::NoEnt => Err(Error::NotFound(name.to_string())),
        Err(err) => Err(Error::operation(err)),
    }
}

fn resolve(raw: &RawArchive, entry: EntryRef<'_>, flags: u32) -> Result<usize> {
    match entry {
        EntryRef::Index(index) => engine_index(raw, index),
        EntryRef::Name(name) => engine_index(raw, locate(raw, name, flags)?),
    }
}

impl ArchiveCell {
    fn with_raw<T>(&self, f: impl FnOnce(&RawArchive) -> Result<T>) -> Result<T> {
        let raw = self.raw.borrow();
        match raw.as_ref() {
            Some(raw) => f(raw),
            None => Err(Error::Closed),
        }
    }

    fn with_raw_mut<T>(&self, f: impl FnOnce(&mut RawArchive) -> Result<T>) -> Result<T> {
        let mut raw = self.raw.borrow_mut();
        match raw.as_mut() {
            Some(raw) => f(raw),
            None => Err(Error::Closed),
        }
    }

    pub(crate) fn register<C: Child + 'static>(&self, child: &Rc<C>, strength: Strength) {
        let child: Rc<dyn Child> = child.clone();
        self.registry.borrow_mut().register(&child, strength);
    }

    /// Remove a child that closed itself. Tolerates being called mid-teardown.
    pub(crate) fn deregister(&self, id: ChildId) {
        let released = match self.registry.try_borrow_mut() {
            Ok(mut registry) => registry.deregister(id),
            Err(_) => return,
        };
        drop(released);
    }

    /// Drop one use of `origin` by an entry source. The last use removes the
    /// pair registered by [`Archive::source`].
    pub(crate) fn release_origin(&self, origin: &Weak<ArchiveCell>) {
        let Some(origin) = origin.upgrade() else {
            return;
        };
        let last = match self.origin_uses.try_borrow_mut() {
            Ok(mut uses) => {
                let remaining = uses
                    .get(&origin.id)
                    .map_or(0, |count| count.saturating_sub(1));
                if remaining == 0 {
                    uses.remove(&origin.id).is_some()
                } else {
                    uses.insert(origin.id, remaining);
                    false
                }
            }
            Err(_) => false,
        };
        if !last {
            return;
        }
        // Unlink from the origin before dropping the pin, which may finalize it
        origin.deregister(self.id);
        self.deregister(origin.id);
        log::debug!(
            "archive #{} no longer sources from archive #{}",
            self.id,
            origin.id
        );
    }

    /// Mark the archive closed and invalidate every child.
    ///
    /// Returns the engine archive and the Strong children, which must stay
    /// alive until the engine archive has been committed or discarded.
    fn teardown(&self) -> Option<(RawArchive, Vec<Rc<dyn Child>>)> {
        // Closed first, so children re-entering this archive see it closed
        let raw = self.raw.borrow_mut().take()?;
        let registry = std::mem::take(&mut *self.registry.borrow_mut());
        let pins = registry.invalidate_all();
        Some((raw, pins))
    }

    fn close(&self) -> Result<()> {
        let Some((raw, pins)) = self.teardown() else {
            return Ok(());
        };
        let result = raw.close().map_err(Error::operation);
        drop(pins);
        match &result {
            Ok(()) => log::debug!("closed archive #{} at {}", self.id, self.path.display()),
            Err(err) => log::debug!(
                "closing archive #{} at {} failed: {}",
                self.id,
                self.path.display(),
                err
            ),
        }
        result
    }
}

impl Child for ArchiveCell {
    fn child_id(&self) -> ChildId {
        self.id
    }

    fn kind(&self) -> ChildKind {
        ChildKind::Archive
    }

    fn invalidate(&self, strength: Strength) -> Result<()> {
        match strength {
            // An origin this archive's parent was pinning; it belongs to its own callers
            Strength::Strong => Ok(()),
            // A target whose content came from the parent
            Strength::Weak => self.close(),
        }
    }

    fn dependent_archives(&self) -> Vec<Rc<dyn Child>> {
        match self.registry.try_borrow() {
            Ok(registry) => registry.weak_archives(),
            Err(_) => Vec::new(),
        }
    }
}

impl EntryProvider for ArchiveCell {
    fn entry_data(
        &self,
        index: usize,
        flags: u32,
        start: u64,
        len: Option<u64>,
    ) -> ZipResult<SourceData> {
        let raw = self
            .raw
            .try_borrow()
            .map_err(|_| crate::zip::ZipError::new(ErrorCode::Internal))?;
        match raw.as_ref() {
            Some(raw) => raw.entry_data(index, flags, start, len),
            None => Err(crate::zip::ZipError::new(ErrorCode::ZipClosed)),
        }
    }
}

impl Drop for ArchiveCell {
    fn drop(&mut self) {
        let Some((raw, pins)) = self.teardown() else {
            return;
        };
        log::debug!(
            "finalizing archive #{} at {}; pending changes discarded",
            self.id,
            self.path.display()
        );
        raw.discard();
        drop(pins);
    }
}
