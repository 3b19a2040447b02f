//! Engine status codes and their human-readable form.
//!
//! The numbering and wording follow libzip so messages look familiar to anyone
//! who has used it. System-class codes carry the OS error number that caused
//! them; [`error_to_str`] appends the OS description for those.

use std::fmt;
use std::io;

/// Status codes reported by the archive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    MultiDisk = 1,
    Rename = 2,
    Close = 3,
    Seek = 4,
    Read = 5,
    Write = 6,
    Crc = 7,
    ZipClosed = 8,
    NoEnt = 9,
    Exists = 10,
    Open = 11,
    TmpOpen = 12,
    Zlib = 13,
    Memory = 14,
    Changed = 15,
    CompNotSupp = 16,
    Eof = 17,
    Inval = 18,
    NoZip = 19,
    Internal = 20,
    Incons = 21,
    Remove = 22,
    Deleted = 23,
    EncrNotSupp = 24,
}

/// How the secondary error number of a code is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SysKind {
    None,
    Sys,
    Zlib,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn describe(self) -> (&'static str, SysKind) {
        use ErrorCode::*;
        match self {
            Ok => ("No error", SysKind::None),
            MultiDisk => ("Multi-disk zip archives not supported", SysKind::None),
            Rename => ("Renaming temporary file failed", SysKind::Sys),
            Close => ("Closing zip archive failed", SysKind::Sys),
            Seek => ("Seek error", SysKind::Sys),
            Read => ("Read error", SysKind::Sys),
            Write => ("Write error", SysKind::Sys),
            Crc => ("CRC error", SysKind::None),
            ZipClosed => ("Containing zip archive was closed", SysKind::None),
            NoEnt => ("No such file", SysKind::None),
            Exists => ("File already exists", SysKind::None),
            Open => ("Can't open file", SysKind::Sys),
            TmpOpen => ("Failure to create temporary file", SysKind::Sys),
            Zlib => ("Zlib error", SysKind::Zlib),
            Memory => ("Malloc failure", SysKind::None),
            Changed => ("Entry has been changed", SysKind::None),
            CompNotSupp => ("Compression method not supported", SysKind::None),
            Eof => ("Premature EOF", SysKind::None),
            Inval => ("Invalid argument", SysKind::None),
            NoZip => ("Not a zip archive", SysKind::None),
            Internal => ("Internal error", SysKind::None),
            Incons => ("Zip archive inconsistent", SysKind::None),
            Remove => ("Can't remove file", SysKind::Sys),
            Deleted => ("Entry has been deleted", SysKind::None),
            EncrNotSupp => ("Encryption method not supported", SysKind::None),
        }
    }
}

/// Render a status code and optional OS error number as one message.
///
/// This is pure: the same inputs always give the same string.
pub fn error_to_str(code: ErrorCode, sys: Option<i32>) -> String {
    let (text, kind) = code.describe();
    match (kind, sys) {
        (SysKind::Sys, Some(errno)) if errno != 0 => {
            format!("{}: {}", text, os_error_text(errno))
        }
        (SysKind::Zlib, Some(zerr)) if zerr != 0 => format!("{}: zlib status {}", text, zerr),
        _ => text.to_string(),
    }
}

fn os_error_text(errno: i32) -> String {
    // io::Error's Display appends " (os error N)"; keep only the description.
    let full = io::Error::from_raw_os_error(errno).to_string();
    match full.rfind(" (os error") {
        Some(pos) => full[..pos].to_string(),
        None => full,
    }
}

/// Failure reported by the archive engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipError {
    pub code: ErrorCode,
    pub sys: Option<i32>,
}

impl ZipError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, sys: None }
    }

    /// Attach the OS error number carried by an I/O failure.
    pub fn io(code: ErrorCode, err: &io::Error) -> Self {
        Self {
            code,
            sys: err.raw_os_error(),
        }
    }

    pub fn message(&self) -> String {
        error_to_str(self.code, self.sys)
    }
}

impl fmt::Display for ZipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ZipError {}

impl From<ErrorCode> for ZipError {
    fn from(code: ErrorCode) -> Self {
        ZipError::new(code)
    }
}

pub type ZipResult<T> = std::result::Result<T, ZipError>;
