pub mod error;
pub mod operation;
pub mod config;

// Re-export commonly used types
pub use error::{ArchiveError, ErrorKind};
pub use operation::{ArchiveKind, BackendOverride, FileTemplate, OperationKind, OperationSpec};
pub use config::EngineConfig;
