use std::path::PathBuf;
use thiserror::Error;

/// Error type for every archive operation
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid operation: {0}")]
    InvalidSpec(String),

    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("No archive backend available: {0}")]
    BackendUnavailable(String),

    #[error("{backend} error: {message}")]
    BackendExecution { backend: String, message: String },

    #[error("{executable} failed to {action} (exit code {code}): {description}")]
    ProcessExit {
        executable: String,
        action: String,
        code: i32,
        description: String,
    },

    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification shared by both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSpec,
    SourceNotFound,
    ArchiveNotFound,
    BackendUnavailable,
    BackendExecution,
    UserCancelled,
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ArchiveError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            ArchiveError::ArchiveNotFound(_) => ErrorKind::ArchiveNotFound,
            ArchiveError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            ArchiveError::BackendExecution { .. }
            | ArchiveError::ProcessExit { .. }
            | ArchiveError::Io(_) => ErrorKind::BackendExecution,
            ArchiveError::UserCancelled => ErrorKind::UserCancelled,
        }
    }

    /// Shorthand for a codec failure raised by a named backend
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        ArchiveError::BackendExecution {
            backend: backend.into(),
            message: message.into(),
        }
    }
}
