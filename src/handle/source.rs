//! Pending content for [`Archive::add`](super::Archive::add) and
//! [`Archive::replace`](super::Archive::replace).

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::zip::RawSource;

use super::archive::{Archive, ArchiveCell};
use super::registry::{Child, ChildId, ChildKind, Strength, next_child_id};

/// Where the content of a [`Source`] comes from.
pub enum Origin<'a> {
    Buffer(Vec<u8>),
    /// `len < 0` reads to the end of the file.
    Path { path: PathBuf, start: u64, len: i64 },
    /// Entry `index` (1-based) of another open archive. `len < 0` reads to the
    /// end of the entry.
    Entry {
        archive: &'a Archive,
        index: u64,
        flags: u32,
        start: u64,
        len: i64,
    },
}

impl<'a> Origin<'a> {
    pub fn buffer(data: impl Into<Vec<u8>>) -> Self {
        Origin::Buffer(data.into())
    }

    /// A whole file.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Origin::Path {
            path: path.into(),
            start: 0,
            len: -1,
        }
    }

    /// A whole entry, copied without recompression.
    pub fn entry(archive: &'a Archive, index: u64) -> Self {
        Origin::Entry {
            archive,
            index,
            flags: 0,
            start: 0,
            len: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Buffer,
    Path,
    Entry,
}

enum State {
    Pending(RawSource),
    /// Handed to the engine by add or replace
    Consumed,
    Closed,
}

pub(crate) struct SourceCell {
    id: ChildId,
    kind: SourceKind,
    target: Weak<ArchiveCell>,
    state: RefCell<State>,
    /// Archive an entry source copies from
    origin: Option<Weak<ArchiveCell>>,
    /// Backing storage of a buffer source; the engine only holds a `Weak` to it
    _buffer: Option<Rc<[u8]>>,
}

impl SourceCell {
    pub(crate) fn new(
        kind: SourceKind,
        target: &Rc<ArchiveCell>,
        raw: RawSource,
        buffer: Option<Rc<[u8]>>,
        origin: Option<&Rc<ArchiveCell>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: next_child_id(),
            kind,
            target: Rc::downgrade(target),
            state: RefCell::new(State::Pending(raw)),
            origin: origin.map(Rc::downgrade),
            _buffer: buffer,
        })
    }

    pub(crate) fn belongs_to(&self, archive: &Rc<ArchiveCell>) -> bool {
        std::ptr::eq(self.target.as_ptr(), Rc::as_ptr(archive))
    }

    /// Hand the descriptor over. A source can be used once.
    pub(crate) fn take(&self) -> Result<RawSource> {
        let mut state = self.state.borrow_mut();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Pending(raw) => Ok(raw),
            State::Consumed => Err(Error::Argument("source has already been used".into())),
            State::Closed => {
                *state = State::Closed;
                Err(Error::Closed)
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.borrow_mut() = State::Closed;
    }

    fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), State::Closed)
    }

    fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), State::Pending(_))
    }

    /// Close a source whose content will never be written and undo its
    /// registrations, including the origin pair of an entry source.
    pub(crate) fn release(&self) {
        self.mark_closed();
        let Some(target) = self.target.upgrade() else {
            return;
        };
        target.deregister(self.id);
        if let Some(origin) = &self.origin {
            target.release_origin(origin);
        }
    }
}

impl Child for SourceCell {
    fn child_id(&self) -> ChildId {
        self.id
    }

    fn kind(&self) -> ChildKind {
        ChildKind::Source
    }

    fn invalidate(&self, _strength: Strength) -> Result<()> {
        self.mark_closed();
        Ok(())
    }
}

impl Drop for SourceCell {
    fn drop(&mut self) {
        if self.is_pending() {
            self.release();
        }
    }
}

/// Content waiting to be added to the archive that built it.
///
/// A source is used by at most one `add` or `replace`. Once used it stays
/// pinned by the archive until the archive closes, since the content is only
/// read when the archive is written.
pub struct Source {
    pub(super) cell: Rc<SourceCell>,
}

impl Source {
    pub(super) fn from_cell(cell: Rc<SourceCell>) -> Self {
        Self { cell }
    }

    pub fn kind(&self) -> SourceKind {
        self.cell.kind
    }

    pub fn is_closed(&self) -> bool {
        self.cell.is_closed()
    }

    /// Release a source that was never used. Closing a used source only marks
    /// it closed; its content is still written when the archive closes.
    ///
    /// Dropping an unused source releases it the same way.
    pub fn close(&self) {
        if self.cell.is_pending() {
            self.cell.release();
        } else {
            self.cell.mark_closed();
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.cell.state.borrow() {
            State::Pending(_) => "pending",
            State::Consumed => "consumed",
            State::Closed => "closed",
        };
        f.debug_struct("Source")
            .field("id", &self.cell.id)
            .field("kind", &self.cell.kind)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::CREATE;

    #[test]
    fn a_source_is_used_once() {
        let dir = tempfile::tempdir().unwrap();
        let ar = Archive::open(dir.path().join("a.zip"), CREATE).unwrap();
        let src = ar.source(Origin::buffer("once")).unwrap();
        ar.add("a", &src).unwrap();
        assert!(matches!(ar.add("b", &src), Err(Error::Argument(_))));
        assert_eq!(ar.num_files().unwrap(), 1);
    }

    #[test]
    fn closing_an_unused_source_releases_it() {
        let dir = tempfile::tempdir().unwrap();
        let ar = Archive::open(dir.path().join("a.zip"), CREATE).unwrap();
        let src = ar.source(Origin::buffer("unused")).unwrap();
        assert_eq!(ar.registered_handles(), 1);
        src.close();
        src.close();
        assert!(src.is_closed());
        assert_eq!(ar.registered_handles(), 0);
        assert!(matches!(ar.add("x", &src), Err(Error::Closed)));
    }

    #[test]
    fn sources_belong_to_one_archive() {
        let dir = tempfile::tempdir().unwrap();
        let a = Archive::open(dir.path().join("a.zip"), CREATE).unwrap();
        let b = Archive::open(dir.path().join("b.zip"), CREATE).unwrap();
        let src = a.source(Origin::buffer("mine")).unwrap();
        assert!(matches!(b.add("x", &src), Err(Error::Argument(_))));
        assert!(!src.is_closed());
    }

    #[test]
    fn dropped_sources_leave_nothing_registered() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.bin");
        std::fs::write(&data, b"content").unwrap();
        let ar = Archive::open(dir.path().join("a.zip"), CREATE).unwrap();

        for _ in 0..1000 {
            let src = ar.source(Origin::path(&data)).unwrap();
            assert_eq!(ar.recorded_handles(), 1);
            drop(src);
        }
        assert_eq!(ar.registered_handles(), 0);
        assert_eq!(ar.recorded_handles(), 0);

        // A used source is pinned, so dropping the handle keeps it
        let src = ar.source(Origin::path(&data)).unwrap();
        ar.add("data.bin", &src).unwrap();
        drop(src);
        assert_eq!(ar.recorded_handles(), 1);
    }

    #[test]
    fn missing_path_is_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let ar = Archive::open(dir.path().join("a.zip"), CREATE).unwrap();
        let err = ar
            .source(Origin::path(dir.path().join("missing.txt")))
            .unwrap_err();
        assert_eq!(err.code(), Some(crate::zip::ErrorCode::Open));
        assert_eq!(ar.registered_handles(), 0);
    }
}
