use crate::cadapter::client::{BackendError, RemoteOp};
use thiserror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

/// Filesystem-level error taxonomy. Remote failures are classified once, by
/// the gateway; everything else is raised by local validation before any
/// remote call is made.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict on {path}: {reason}")]
    Conflict { path: String, reason: String },

    /// The object changed between open and a ranged read.
    #[error("{path} changed since it was opened (etag {etag})")]
    ContentExpired { path: String, etag: String },

    #[error("precondition failed: {path}")]
    PreconditionFailed { path: String },

    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    #[error("{op} on {target} failed: {source}")]
    Remote {
        op: RemoteOp,
        target: String,
        source: BackendError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VfsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        VfsError::InvalidArgument(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        VfsError::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, VfsError::PermissionDenied { .. })
    }
}
