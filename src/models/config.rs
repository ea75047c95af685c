use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::core::compression::exit_codes::ExitCodeEntry;
use crate::models::ArchiveError;

/// Engine configuration
///
/// Every field has a default so a partial JSON document is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Delay between two polls of the worker state
    pub poll_interval_ms: u64,
    /// Yield after spawning the worker, before the first poll
    pub startup_delay_ms: u64,
    /// Cancel the operation once it runs longer than this
    pub timeout_secs: Option<u64>,
    /// Executable names tried in order (primary first)
    pub executable_candidates: Vec<String>,
    /// Searched before `PATH`; defaults to the running executable's directory
    pub application_dir: Option<PathBuf>,
    /// Always use the external executable
    pub prefer_process_backend: bool,
    /// Added to (or replacing entries of) the default exit-code table
    pub exit_codes: Vec<ExitCodeEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            startup_delay_ms: 10,
            timeout_secs: None,
            executable_candidates: vec!["7z".to_string(), "7za".to_string()],
            application_dir: None,
            prefer_process_backend: false,
            exit_codes: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ArchiveError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            ArchiveError::InvalidSpec(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Directory searched for the executable before `PATH`
    pub fn resolved_application_dir(&self) -> Option<PathBuf> {
        self.application_dir.clone().or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        })
    }
}
