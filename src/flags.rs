//! Bit flags accepted by archive operations.
//!
//! Open flags go to [`Archive::open`](crate::Archive::open); the `FL_*` flags go
//! to lookups, stat, file-open and entry sources. The values are fixed for the
//! life of the process and match libzip's classic numbering.

/// Create the archive if it does not exist.
pub const CREATE: u32 = 1;
/// With [`CREATE`], fail if the archive already exists.
pub const EXCL: u32 = 2;
/// Cross-check the central directory against the local headers on open.
pub const CHECKCONS: u32 = 4;

/// Name lookups ignore ASCII case.
pub const FL_NOCASE: u32 = 1;
/// Name lookups ignore directory components.
pub const FL_NODIR: u32 = 2;
/// Read or copy the compressed bytes as stored.
pub const FL_COMPRESSED: u32 = 4;
/// Use the original data, ignoring pending changes.
pub const FL_UNCHANGED: u32 = 8;
/// Recompress when copying an entry from another archive.
pub const FL_RECOMPRESS: u32 = 16;

pub(crate) const OPEN_MASK: u32 = CREATE | EXCL | CHECKCONS;
pub(crate) const ENTRY_MASK: u32 =
    FL_NOCASE | FL_NODIR | FL_COMPRESSED | FL_UNCHANGED | FL_RECOMPRESS;

/// Every exported flag by name, in declaration order.
pub const CONSTANTS: &[(&str, u32)] = &[
    ("CREATE", CREATE),
    ("EXCL", EXCL),
    ("CHECKCONS", CHECKCONS),
    ("FL_NOCASE", FL_NOCASE),
    ("FL_NODIR", FL_NODIR),
    ("FL_COMPRESSED", FL_COMPRESSED),
    ("FL_UNCHANGED", FL_UNCHANGED),
    ("FL_RECOMPRESS", FL_RECOMPRESS),
];

/// Look up a flag by its exported name.
pub fn by_name(name: &str) -> Option<u32> {
    CONSTANTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, value)| *value)
}

/// Bitwise OR of all arguments; `0` for none.
pub fn or(values: &[i64]) -> i64 {
    values.iter().fold(0, |acc, v| acc | v)
}
