//! Archive, file and source handles.
//!
//! Every [`File`] and [`Source`] is registered with the [`Archive`] that
//! issued it. Files and unused sources are registered Weak: the archive can
//! force them closed but does not keep them alive. Sources that carry content
//! the archive still has to write, and archives used as the origin of an
//! entry source, are registered Strong and stay alive until the archive is
//! closed or dropped.

mod archive;
mod file;
mod registry;
mod source;

pub use archive::{Archive, EntryRef, Stat};
pub use file::File;
pub use registry::Strength;
pub use source::{Origin, Source, SourceKind};
