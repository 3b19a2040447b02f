//! Per-archive table of the handles derived from it.
//!
//! Every handle an archive issues is recorded here under a stable id. A
//! Strong entry owns an `Rc` to the child and so keeps it alive until the
//! archive goes away; a Weak entry only remembers where the child is, so the
//! archive can still force it closed if it is alive at that point.
//!
//! # Invalidation
//! [`ChildRegistry::invalidate_all`] consumes the registry. The owning archive
//! takes its registry out of its cell before calling it, so children that
//! deregister themselves, or re-enter the archive, during their teardown
//! never observe a half-walked table.

use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Process-unique identity of a handle.
pub(crate) type ChildId = u64;

static NEXT_CHILD_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_child_id() -> ChildId {
    NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a parent refers to a child. `Strong` sorts above `Weak`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strength {
    Weak,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildKind {
    Archive,
    File,
    Source,
}

/// A handle that an archive can force into its terminal state.
pub(crate) trait Child {
    fn child_id(&self) -> ChildId;

    fn kind(&self) -> ChildKind;

    /// Force the child into its terminal state.
    ///
    /// Called once per parent teardown with the strength the parent held, but
    /// must tolerate being called again, or after the child closed itself.
    fn invalidate(&self, strength: Strength) -> Result<()>;

    /// Archives that hold a Weak reference to this one as their origin.
    fn dependent_archives(&self) -> Vec<Rc<dyn Child>> {
        Vec::new()
    }
}

enum Link {
    Strong(Rc<dyn Child>),
    Weak(Weak<dyn Child>),
}

impl Link {
    fn strength(&self) -> Strength {
        match self {
            Link::Strong(_) => Strength::Strong,
            Link::Weak(_) => Strength::Weak,
        }
    }

    fn upgrade(&self) -> Option<Rc<dyn Child>> {
        match self {
            Link::Strong(child) => Some(child.clone()),
            Link::Weak(child) => child.upgrade(),
        }
    }
}

struct Entry {
    kind: ChildKind,
    link: Link,
}

/// Children of one archive, in registration order.
#[derive(Default)]
pub(crate) struct ChildRegistry {
    entries: BTreeMap<ChildId, Entry>,
}

/// Removed registry entry; dropping it may release the last reference to a child.
pub(crate) struct Released {
    _pin: Option<Rc<dyn Child>>,
}

impl ChildRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `child` under `strength`.
    ///
    /// Registering an existing child keeps the stronger of the two strengths.
    pub(crate) fn register(&mut self, child: &Rc<dyn Child>, strength: Strength) {
        let id = child.child_id();
        if let Some(existing) = self.entries.get(&id) {
            if existing.link.strength() >= strength {
                return;
            }
        }
        let link = match strength {
            Strength::Strong => Link::Strong(child.clone()),
            Strength::Weak => Link::Weak(Rc::downgrade(child)),
        };
        self.entries.insert(
            id,
            Entry {
                kind: child.kind(),
                link,
            },
        );
    }

    /// Forget `id`. The caller must drop the result outside any borrow of this registry.
    #[must_use]
    pub(crate) fn deregister(&mut self, id: ChildId) -> Released {
        let pin = self.entries.remove(&id).and_then(|entry| match entry.link {
            Link::Strong(child) => Some(child),
            Link::Weak(_) => None,
        });
        Released { _pin: pin }
    }

    pub(crate) fn strength_of(&self, id: ChildId) -> Option<Strength> {
        self.entries.get(&id).map(|entry| entry.link.strength())
    }

    pub(crate) fn contains_weak(&self, id: ChildId) -> bool {
        self.strength_of(id) == Some(Strength::Weak)
    }

    /// Number of registered children still alive.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| match &entry.link {
                Link::Strong(_) => true,
                Link::Weak(child) => child.strong_count() > 0,
            })
            .count()
    }

    /// Number of entries, including Weak ones whose child is gone.
    #[cfg(test)]
    pub(crate) fn recorded(&self) -> usize {
        self.entries.len()
    }

    /// Live archives registered Weak, i.e. archives depending on the owner.
    pub(crate) fn weak_archives(&self) -> Vec<Rc<dyn Child>> {
        self.entries
            .values()
            .filter(|entry| entry.kind == ChildKind::Archive)
            .filter_map(|entry| match &entry.link {
                Link::Weak(child) => child.upgrade(),
                Link::Strong(_) => None,
            })
            .collect()
    }

    /// Invalidate every child that is still alive.
    ///
    /// A failing child is logged and skipped. The Strong children are handed
    /// back so the caller decides when they are released.
    pub(crate) fn invalidate_all(self) -> Vec<Rc<dyn Child>> {
        let mut pins = Vec::new();
        let total = self.entries.len();
        let mut invalidated = 0usize;

        for (id, entry) in self.entries {
            let strength = entry.link.strength();
            let Some(child) = entry.link.upgrade() else {
                continue;
            };
            if let Err(err) = child.invalidate(strength) {
                log::warn!(
                    "failed to invalidate {:?} handle #{}: {}",
                    entry.kind,
                    id,
                    err
                );
            }
            invalidated += 1;
            if strength == Strength::Strong {
                pins.push(child);
            }
        }

        log::debug!("invalidated {} of {} registered handles", invalidated, total);
        pins
    }
}

/// True when `origin` already depends, directly or through other archives, on `target`.
///
/// `target_dependents` are the archives registered Weak in the target.
pub(crate) fn reaches(target_dependents: Vec<Rc<dyn Child>>, origin: ChildId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = target_dependents;
    while let Some(archive) = stack.pop() {
        let id = archive.child_id();
        if id == origin {
            return true;
        }
        if seen.insert(id) {
            stack.extend(archive.dependent_archives());
        }
    }
    false
}
