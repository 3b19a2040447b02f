use std::fs;
use std::path::Path;

use tempfile::TempDir;
use ziparc::flags::CREATE;
use ziparc::{Archive, Error, Origin};

/// Write an archive holding `entries` and reopen it.
fn archive_with(dir: &TempDir, name: &str, entries: &[(&str, &str)]) -> Archive {
    let path = dir.path().join(name);
    let ar = Archive::open(&path, CREATE).unwrap();
    for (entry, content) in entries {
        let src = ar.source(Origin::buffer(*content)).unwrap();
        ar.add(entry, &src).unwrap();
    }
    ar.close().unwrap();
    Archive::open(&path, 0).unwrap()
}

fn read_all(path: &Path, entry: &str) -> Vec<u8> {
    let ar = Archive::open(path, 0).unwrap();
    let file = ar.open_file(entry, 0).unwrap();
    file.read(1 << 16).unwrap()
}

#[test]
fn closing_the_archive_closes_every_child() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha"), ("b.txt", "beta")]);

    let first = ar.open_file(1u64, 0).unwrap();
    let second = ar.open_file("b.txt", 0).unwrap();
    let unused = ar.source(Origin::buffer("never added")).unwrap();
    let used = ar.source(Origin::buffer("added")).unwrap();
    ar.add("c.txt", &used).unwrap();
    assert_eq!(first.read(2).unwrap(), b"al");

    ar.close().unwrap();

    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(unused.is_closed());
    assert!(used.is_closed());
    assert!(first.read(10).unwrap_err().is_closed());
    first.close().unwrap();
    second.close().unwrap();
    unused.close();

    assert_eq!(read_all(&dir.path().join("a.zip"), "c.txt"), b"added");
}

#[test]
fn closing_twice_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    ar.close().unwrap();
    ar.close().unwrap();
    assert!(ar.is_closed());
}

#[test]
fn accessors_report_a_closed_archive() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    ar.close().unwrap();

    assert!(matches!(ar.num_files(), Err(Error::Closed)));
    assert!(matches!(ar.stat(1u64, 0), Err(Error::Closed)));
    assert!(matches!(ar.name_locate("a.txt", 0), Err(Error::Closed)));
    assert!(matches!(ar.comment(0), Err(Error::Closed)));
    assert!(matches!(ar.open_file(1u64, 0), Err(Error::Closed)));
    assert!(matches!(ar.source(Origin::buffer("x")), Err(Error::Closed)));
    assert!(matches!(ar.add_directory("d"), Err(Error::Closed)));
}

#[test]
fn dropping_the_archive_first_invalidates_open_files() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let file = ar.open_file(1u64, 0).unwrap();

    drop(ar);

    assert!(file.is_closed());
    assert!(matches!(file.read(5), Err(Error::Closed)));
    drop(file);
}

#[test]
fn dropping_files_first_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let file = ar.open_file(1u64, 0).unwrap();
    assert_eq!(ar.registered_handles(), 1);

    drop(file);

    assert_eq!(ar.registered_handles(), 0);
    ar.close().unwrap();
}

#[test]
fn dropping_without_close_discards_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let before = fs::read(&path).unwrap();

    let src = ar.source(Origin::buffer("discarded")).unwrap();
    ar.add("b.txt", &src).unwrap();
    ar.delete(1).unwrap();
    drop(src);
    drop(ar);

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn a_clone_keeps_the_archive_open() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let other = ar.clone();
    let file = other.open_file(1u64, 0).unwrap();

    drop(ar);

    assert!(!file.is_closed());
    assert_eq!(file.read(5).unwrap(), b"alpha");
    other.close().unwrap();
    assert!(file.is_closed());
}

#[test]
fn reverse_entry_source_is_circular() {
    let dir = tempfile::tempdir().unwrap();
    let a = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let b = archive_with(&dir, "b.zip", &[("b.txt", "beta")]);

    let from_b = a.source(Origin::entry(&b, 1)).unwrap();
    let (a_handles, b_handles) = (a.registered_handles(), b.registered_handles());

    let err = b.source(Origin::entry(&a, 1)).unwrap_err();
    assert!(matches!(err, Error::CircularReference));
    assert_eq!(a.registered_handles(), a_handles);
    assert_eq!(b.registered_handles(), b_handles);

    a.add("copy.txt", &from_b).unwrap();
    a.close().unwrap();
    assert!(!b.is_closed());
    assert_eq!(read_all(&dir.path().join("a.zip"), "copy.txt"), b"beta");
}

#[test]
fn longer_cycles_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let a = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let b = archive_with(&dir, "b.zip", &[("b.txt", "beta")]);
    let c = archive_with(&dir, "c.zip", &[("c.txt", "gamma")]);

    let _a_from_b = a.source(Origin::entry(&b, 1)).unwrap();
    let _b_from_c = b.source(Origin::entry(&c, 1)).unwrap();

    assert!(matches!(
        c.source(Origin::entry(&a, 1)),
        Err(Error::CircularReference)
    ));
    assert!(matches!(
        a.source(Origin::entry(&a, 1)),
        Err(Error::CircularReference)
    ));
}

#[test]
fn unused_entry_sources_release_their_origin() {
    let dir = tempfile::tempdir().unwrap();
    let a = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let b = archive_with(&dir, "b.zip", &[("b.txt", "beta")]);

    let from_b = a.source(Origin::entry(&b, 1)).unwrap();
    assert!(matches!(
        b.source(Origin::entry(&a, 1)),
        Err(Error::CircularReference)
    ));
    drop(from_b);
    assert_eq!(a.registered_handles(), 0);
    assert_eq!(b.registered_handles(), 0);

    // The reverse direction is allowed once nothing pairs the two
    let from_a = b.source(Origin::entry(&a, 1)).unwrap();
    from_a.close();
    assert_eq!(a.registered_handles(), 0);

    // Nothing pins `b` any more, so dropping it leaves `a` open
    drop(b);
    assert!(!a.is_closed());
    let src = a.source(Origin::buffer("after")).unwrap();
    a.add("after.txt", &src).unwrap();
    a.close().unwrap();
    assert_eq!(read_all(&dir.path().join("a.zip"), "after.txt"), b"after");
}

#[test]
fn closing_the_origin_first_closes_its_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let target_path = dir.path().join("target.zip");
    let target = archive_with(&dir, "target.zip", &[("keep.txt", "kept")]);
    let origin = archive_with(&dir, "origin.zip", &[("o.txt", "origin data")]);
    let before = fs::read(&target_path).unwrap();

    let src = target.source(Origin::entry(&origin, 1)).unwrap();
    target.add("copied.txt", &src).unwrap();
    let file = target.open_file(1u64, 0).unwrap();

    origin.close().unwrap();

    assert!(target.is_closed());
    assert!(file.is_closed());
    assert!(src.is_closed());
    target.close().unwrap();
    // The target's commit lost its origin, so nothing was written
    assert_eq!(fs::read(&target_path).unwrap(), before);
}

#[test]
fn the_target_keeps_its_origin_alive() {
    let dir = tempfile::tempdir().unwrap();
    let target = Archive::open(dir.path().join("target.zip"), CREATE).unwrap();
    let origin = archive_with(&dir, "origin.zip", &[("o.txt", "origin data")]);

    let src = target.source(Origin::entry(&origin, 1)).unwrap();
    target.add("copied.txt", &src).unwrap();
    drop(src);
    drop(origin);

    target.close().unwrap();
    assert_eq!(
        read_all(&dir.path().join("target.zip"), "copied.txt"),
        b"origin data"
    );
}

#[test]
fn failed_add_releases_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let src = ar.source(Origin::buffer("dup")).unwrap();

    let err = ar.add("a.txt", &src).unwrap_err();

    assert!(matches!(err, Error::Operation { .. }));
    assert!(src.is_closed());
    assert_eq!(ar.registered_handles(), 0);
    assert_eq!(ar.num_files().unwrap(), 1);
}

#[test]
fn bad_indices_leave_the_source_usable() {
    let dir = tempfile::tempdir().unwrap();
    let ar = archive_with(&dir, "a.zip", &[("a.txt", "alpha")]);
    let src = ar.source(Origin::buffer("new")).unwrap();

    assert!(matches!(ar.replace(0, &src), Err(Error::Argument(_))));
    assert!(matches!(ar.replace(9, &src), Err(Error::NotFound(_))));
    assert!(!src.is_closed());
    assert_eq!(ar.replace(1, &src).unwrap(), 1);
    ar.close().unwrap();

    assert_eq!(read_all(&dir.path().join("a.zip"), "a.txt"), b"new");
}
