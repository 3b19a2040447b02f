use thiserror::Error;

use crate::zip::{ErrorCode, ZipError, error_to_str};

/// Errors returned by archive, file and source handles.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive could not be opened or created.
    #[error("{message}")]
    Open {
        code: ErrorCode,
        sys: Option<i32>,
        message: String,
    },

    /// An operation on a live archive, file or source failed.
    #[error("{message}")]
    Operation { code: ErrorCode, message: String },

    /// No entry with that name or index.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// The handle was closed, explicitly or because its archive was.
    #[error("handle is closed")]
    Closed,

    /// The source would make two archives keep each other alive.
    #[error("source archive depends on the target archive; refusing circular reference")]
    CircularReference,

    #[error("invalid argument: {0}")]
    Argument(String),
}

impl Error {
    /// Failure to open: keeps the OS error number for the message.
    pub(crate) fn open(err: ZipError) -> Self {
        Error::Open {
            code: err.code,
            sys: err.sys,
            message: error_to_str(err.code, err.sys),
        }
    }

    /// Failure of an operation: the status text only.
    pub(crate) fn operation(err: ZipError) -> Self {
        Error::Operation {
            code: err.code,
            message: error_to_str(err.code, None),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Engine status code, when the engine produced this error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Open { code, .. } | Error::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
