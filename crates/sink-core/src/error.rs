use std::path::PathBuf;

use thiserror::Error;

/// Errors shared across the `sink` crates, corresponding to the taxonomy in
/// the design's error handling section: `NotFound`, `PermissionDenied`,
/// `UnknownPathKind`, `IOError`, `StoreError`, `UserAbort`.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("no record found for path: {0}")]
    NotFound(PathBuf),

    #[error("permission denied listing directory: {0}")]
    PermissionDenied(PathBuf),

    #[error("unknown path kind (not a file or directory): {0}")]
    UnknownPathKind(PathBuf),

    #[error("missing child record for {child} while computing digest of {parent}")]
    MissingChild { parent: PathBuf, child: PathBuf },

    #[error("quarantine aborted by user")]
    UserAbort,
}

pub type SinkResult<T> = Result<T, SinkError>;
