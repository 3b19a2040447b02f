use std::fs;

use ziparc::flags::{self, CREATE, EXCL, FL_NOCASE, FL_NODIR, FL_RECOMPRESS, FL_UNCHANGED};
use ziparc::zip::ErrorCode;
use ziparc::{Archive, Error, Origin};

fn read_entry(ar: &Archive, entry: &str) -> Vec<u8> {
    let file = ar.open_file(entry, 0).unwrap();
    let mut out = Vec::new();
    loop {
        let chunk = file.read(4096).unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend(chunk);
    }
    file.close().unwrap();
    out
}

#[test]
fn created_archive_exists_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.zip");

    Archive::open(&path, CREATE).unwrap().close().unwrap();

    assert!(path.exists());
    let ar = Archive::open(&path, 0).unwrap();
    assert_eq!(ar.num_files().unwrap(), 0);
    assert_eq!(ar.comment(0).unwrap(), None);
}

#[test]
fn open_failures_carry_the_status() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.zip");

    let err = Archive::open(&missing, 0).unwrap_err();
    assert!(matches!(err, Error::Open { .. }));
    assert_eq!(err.code(), Some(ErrorCode::NoEnt));
    assert_eq!(err.to_string(), "No such file");

    let not_zip = dir.path().join("text.zip");
    fs::write(&not_zip, "this is not an archive at all").unwrap();
    let err = Archive::open(&not_zip, 0).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoZip));
}

#[test]
fn excl_rejects_an_existing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    Archive::open(&path, CREATE | EXCL).unwrap().close().unwrap();

    let err = Archive::open(&path, CREATE | EXCL).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Exists));
    assert!(Archive::open(&path, CREATE).is_ok());
}

#[test]
fn added_buffer_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let ar = Archive::open(&path, CREATE).unwrap();
    let src = ar.source(Origin::buffer("hello")).unwrap();
    assert_eq!(ar.add("a.txt", &src).unwrap(), 1);
    ar.close().unwrap();

    let ar = Archive::open(&path, flags::CHECKCONS).unwrap();
    let index = ar.name_locate("a.txt", 0).unwrap();
    let stat = ar.stat(index, 0).unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.name, "a.txt");
    assert_eq!(stat.encryption_method, 0);

    let file = ar.open_file(index, 0).unwrap();
    assert_eq!(file.read(5).unwrap(), b"hello");
    assert!(file.read(5).unwrap().is_empty());
    assert!(matches!(file.read(0), Err(Error::Argument(_))));
    file.close().unwrap();
}

#[test]
fn large_content_is_deflated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let text = "the quick brown fox jumps over the lazy dog\n".repeat(2000);

    let ar = Archive::open(&path, CREATE).unwrap();
    let src = ar.source(Origin::buffer(text.as_str())).unwrap();
    ar.add("fox.txt", &src).unwrap();
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    let stat = ar.stat("fox.txt", 0).unwrap();
    assert_eq!(stat.compression_method, Some(8));
    assert!(stat.compressed_size.unwrap() < stat.size);
    let mut crc = flate2::Crc::new();
    crc.update(text.as_bytes());
    assert_eq!(stat.crc, crc.sum());
    assert_eq!(read_entry(&ar, "fox.txt"), text.as_bytes());
}

#[test]
fn comments_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let ar = Archive::open(&path, CREATE).unwrap();
    let src = ar.source(Origin::buffer("x")).unwrap();
    let index = ar.add("x", &src).unwrap();
    ar.set_comment(Some("archive comment")).unwrap();
    ar.set_file_comment(index, Some("entry comment")).unwrap();
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    assert_eq!(ar.comment(0).unwrap().as_deref(), Some("archive comment"));
    assert_eq!(ar.file_comment(1, 0).unwrap().as_deref(), Some("entry comment"));
    ar.set_comment(None).unwrap();
    ar.set_file_comment(1, None).unwrap();
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    assert_eq!(ar.comment(0).unwrap(), None);
    assert_eq!(ar.file_comment(1, 0).unwrap(), None);
}

#[test]
fn lookup_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let ar = Archive::open(&path, CREATE).unwrap();
    ar.add_directory("docs").unwrap();
    let src = ar.source(Origin::buffer("read me")).unwrap();
    ar.add("docs/ReadMe.TXT", &src).unwrap();

    assert_eq!(ar.get_name(1, 0).unwrap(), "docs/");
    assert!(matches!(
        ar.name_locate("docs/readme.txt", 0),
        Err(Error::NotFound(_))
    ));
    assert_eq!(ar.name_locate("docs/readme.txt", FL_NOCASE).unwrap(), 2);
    assert_eq!(ar.name_locate("ReadMe.TXT", FL_NODIR).unwrap(), 2);
    assert_eq!(
        ar.name_locate("readme.txt", FL_NOCASE | FL_NODIR).unwrap(),
        2
    );
}

#[test]
fn pending_changes_can_be_reverted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.zip");
    let ar = Archive::open(&path, CREATE).unwrap();
    for name in ["one", "two"] {
        let src = ar.source(Origin::buffer(name)).unwrap();
        ar.add(name, &src).unwrap();
    }
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    ar.rename(1, "uno").unwrap();
    ar.delete(2).unwrap();
    assert_eq!(ar.get_name(1, 0).unwrap(), "uno");
    assert_eq!(ar.get_name(1, FL_UNCHANGED).unwrap(), "one");
    assert_eq!(ar.stat(2u64, 0).unwrap_err().code(), Some(ErrorCode::Deleted));
    assert_eq!(ar.num_files().unwrap(), 2);

    ar.unchange(1).unwrap();
    assert_eq!(ar.get_name(1, 0).unwrap(), "one");
    ar.unchange_all().unwrap();
    assert_eq!(ar.get_name(2, 0).unwrap(), "two");
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    assert_eq!(ar.num_files().unwrap(), 2);
}

#[test]
fn path_sources_read_a_window() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.bin");
    fs::write(&data, b"0123456789").unwrap();
    let path = dir.path().join("a.zip");

    let ar = Archive::open(&path, CREATE).unwrap();
    let whole = ar.source(Origin::path(&data)).unwrap();
    let window = ar
        .source(Origin::Path {
            path: data.clone(),
            start: 3,
            len: 4,
        })
        .unwrap();
    assert!(
        ar.source(Origin::Path {
            path: data.clone(),
            start: 8,
            len: 5,
        })
        .is_err()
    );
    ar.add("whole", &whole).unwrap();
    ar.add("window", &window).unwrap();
    ar.close().unwrap();

    let ar = Archive::open(&path, 0).unwrap();
    assert_eq!(read_entry(&ar, "whole"), b"0123456789");
    assert_eq!(read_entry(&ar, "window"), b"3456");
}

#[test]
fn entries_copy_between_archives() {
    let dir = tempfile::tempdir().unwrap();
    let origin_path = dir.path().join("origin.zip");
    let target_path = dir.path().join("target.zip");
    let text = "copied content, copied content, copied content\n".repeat(100);

    let origin = Archive::open(&origin_path, CREATE).unwrap();
    let src = origin.source(Origin::buffer(text.as_str())).unwrap();
    origin.add("text.txt", &src).unwrap();
    origin.close().unwrap();
    let origin = Archive::open(&origin_path, 0).unwrap();
    let original = origin.stat(1u64, 0).unwrap();

    let target = Archive::open(&target_path, CREATE).unwrap();
    let raw = target.source(Origin::entry(&origin, 1)).unwrap();
    let recompressed = target
        .source(Origin::Entry {
            archive: &origin,
            index: 1,
            flags: FL_RECOMPRESS,
            start: 0,
            len: -1,
        })
        .unwrap();
    let window = target
        .source(Origin::Entry {
            archive: &origin,
            index: 1,
            flags: 0,
            start: 7,
            len: 7,
        })
        .unwrap();
    target.add("raw.txt", &raw).unwrap();
    target.add("recompressed.txt", &recompressed).unwrap();
    target.add("window.txt", &window).unwrap();
    target.close().unwrap();
    assert!(!origin.is_closed());

    let target = Archive::open(&target_path, flags::CHECKCONS).unwrap();
    let copied = target.stat("raw.txt", 0).unwrap();
    assert_eq!(copied.crc, original.crc);
    assert_eq!(copied.compressed_size, original.compressed_size);
    assert_eq!(copied.mtime, original.mtime);
    assert_eq!(read_entry(&target, "raw.txt"), text.as_bytes());
    assert_eq!(read_entry(&target, "recompressed.txt"), text.as_bytes());
    assert_eq!(read_entry(&target, "window.txt"), b"content");
}

#[test]
fn entry_sources_check_the_origin_entry() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Archive::open(dir.path().join("origin.zip"), CREATE).unwrap();
    let src = origin.source(Origin::buffer("short")).unwrap();
    origin.add("s", &src).unwrap();
    let target = Archive::open(dir.path().join("target.zip"), CREATE).unwrap();

    // Not written yet, so there is no original data to copy
    let err = target.source(Origin::entry(&origin, 1)).unwrap_err();
    assert!(matches!(err, Error::Operation { .. }));
    assert!(matches!(
        target.source(Origin::entry(&origin, 0)),
        Err(Error::Argument(_))
    ));
    assert!(matches!(
        target.source(Origin::entry(&origin, 2)),
        Err(Error::NotFound(_))
    ));
    assert_eq!(target.registered_handles(), 0);
    assert_eq!(origin.registered_handles(), 1);
}
