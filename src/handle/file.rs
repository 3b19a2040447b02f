//! Read handles over archive entries.

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::zip::RawFile;

use super::archive::ArchiveCell;
use super::registry::{Child, ChildId, ChildKind, Strength, next_child_id};

pub(crate) struct FileCell {
    id: ChildId,
    name: String,
    archive: Weak<ArchiveCell>,
    /// `None` once closed
    raw: RefCell<Option<RawFile>>,
}

impl FileCell {
    pub(crate) fn new(archive: &Rc<ArchiveCell>, raw: RawFile, name: String) -> Rc<Self> {
        Rc::new(Self {
            id: next_child_id(),
            name,
            archive: Rc::downgrade(archive),
            raw: RefCell::new(Some(raw)),
        })
    }

    /// Close the cursor. Later calls return `Ok(())` without doing anything.
    fn close(&self) -> Result<()> {
        let Some(raw) = self.raw.borrow_mut().take() else {
            return Ok(());
        };
        if let Some(archive) = self.archive.upgrade() {
            archive.deregister(self.id);
        }
        raw.close().map_err(Error::operation)
    }
}

impl Child for FileCell {
    fn child_id(&self) -> ChildId {
        self.id
    }

    fn kind(&self) -> ChildKind {
        ChildKind::File
    }

    fn invalidate(&self, _strength: Strength) -> Result<()> {
        self.close()
    }
}

impl Drop for FileCell {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("closing dropped file {:?} failed: {}", self.name, err);
        }
    }
}

/// An entry opened for reading.
///
/// Closed by [`File::close`], by dropping it, or by closing its archive.
pub struct File {
    cell: Rc<FileCell>,
}

impl File {
    pub(super) fn from_cell(cell: Rc<FileCell>) -> Self {
        Self { cell }
    }

    /// Read up to `max_len` bytes. An empty result means the end of the entry.
    ///
    /// A CRC mismatch is reported by the read that reaches the end.
    pub fn read(&self, max_len: i64) -> Result<Vec<u8>> {
        if max_len <= 0 {
            return Err(Error::Argument(format!("read length must be positive, got {}", max_len)));
        }
        let mut raw = self.cell.raw.borrow_mut();
        let raw = raw.as_mut().ok_or(Error::Closed)?;

        let mut buf = vec![0u8; max_len.min(1 << 20) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = raw.read(&mut buf[filled..]).map_err(Error::operation)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Close the file, reporting a CRC or decompression failure that was not
    /// already returned by `read`. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.cell.close()
    }

    pub fn is_closed(&self) -> bool {
        self.cell.raw.borrow().is_none()
    }

    /// Entry name as it was when the file was opened.
    pub fn name(&self) -> &str {
        &self.cell.name
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut raw = self.cell.raw.borrow_mut();
        let raw = raw
            .as_mut()
            .ok_or_else(|| io::Error::other(Error::Closed))?;
        raw.read(buf)
            .map_err(|e| io::Error::other(Error::operation(e)))
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
