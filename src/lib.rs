// Module declarations
pub mod models;
pub mod core;
pub mod commands;
pub mod utils;

pub use crate::core::compression::ArchiveEngine;
pub use crate::core::compression::common::{ArchiveHandler, FileDecision, ProgressHooks};
pub use crate::core::compression::exit_codes::{ExitCodeEntry, ExitCodeTable, ExitStatus};
pub use crate::core::compression::selector::BackendSelector;
pub use crate::models::{
    ArchiveError, ArchiveKind, BackendOverride, EngineConfig, ErrorKind, FileTemplate, OperationSpec,
};
pub use crate::utils::bridge::{AsyncBridge, RunningOperation};
pub use crate::utils::progress::{ProgressSink, ProgressSnapshot, SinkError};
