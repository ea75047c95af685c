// Backend discovery

use std::env::consts::EXE_SUFFIX;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};
use crate::core::compression::common::ArchiveHandler;
use crate::core::compression::exit_codes::ExitCodeTable;
use crate::core::compression::library_handler::LibraryHandler;
use crate::core::compression::process_handler::ProcessHandler;
use crate::models::{ArchiveError, EngineConfig};

/// Whether the in-process codecs work here; probed once per process and
/// never invalidated
static LIBRARY_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    let available = matches!(probe_library(), Ok(true));
    if available {
        debug!("in-process archive library available");
    } else {
        warn!("in-process archive library failed its self-check");
    }
    available
});

/// Round-trip a tiny zip in memory
fn probe_library() -> zip::result::ZipResult<bool> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer.start_file("probe", zip::write::SimpleFileOptions::default())?;
        writer.write_all(b"probe")?;
        writer.finish()?;
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(buffer.into_inner()))?;
    let mut content = Vec::new();
    archive.by_index(0)?.read_to_end(&mut content)?;
    Ok(content == b"probe")
}

pub fn library_available() -> bool {
    *LIBRARY_AVAILABLE
}

/// Picks a handler for each operation
///
/// Evaluated on every call; only the library probe is cached.
pub struct BackendSelector {
    candidates: Vec<String>,
    application_dir: Option<PathBuf>,
    prefer_process: bool,
    exit_codes: ExitCodeTable,
    library_enabled: bool,
}

impl BackendSelector {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            candidates: config.executable_candidates.clone(),
            application_dir: config.resolved_application_dir(),
            prefer_process: config.prefer_process_backend,
            exit_codes: ExitCodeTable::seven_zip().with_entries(config.exit_codes.iter().cloned()),
            library_enabled: true,
        }
    }

    /// Treat the in-process library as missing
    pub fn without_library(mut self) -> Self {
        self.library_enabled = false;
        self
    }

    /// Return a ready handler, or `BackendUnavailable`
    pub fn select(&self, force_process: bool) -> Result<Arc<dyn ArchiveHandler>, ArchiveError> {
        let want_process = force_process || self.prefer_process;

        if !want_process && self.library_enabled && library_available() {
            debug!("using library backend");
            return Ok(Arc::new(LibraryHandler::new()));
        }

        match self.find_executable() {
            Some(executable) => {
                info!(executable = %executable.display(), "using process backend");
                Ok(Arc::new(ProcessHandler::new(executable, self.exit_codes.clone())))
            }
            None => {
                let primary = self.candidates.first().map(String::as_str).unwrap_or("7z");
                Err(ArchiveError::BackendUnavailable(format!(
                    "archive library unavailable and '{}' executable not found",
                    primary
                )))
            }
        }
    }

    /// Application directory first, then `PATH`, candidate by candidate
    pub fn find_executable(&self) -> Option<PathBuf> {
        for name in &self.candidates {
            if let Some(dir) = &self.application_dir {
                let local = dir.join(format!("{}{}", name, EXE_SUFFIX));
                if local.is_file() {
                    return Some(local);
                }
            }
            if let Ok(found) = which::which(name) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &TempDir, candidates: &[&str]) -> EngineConfig {
        EngineConfig {
            executable_candidates: candidates.iter().map(|c| c.to_string()).collect(),
            application_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_library_probe() {
        assert!(library_available());
        assert!(library_available());
    }

    #[test]
    fn test_library_preferred() {
        let dir = TempDir::new().unwrap();
        let selector = BackendSelector::from_config(&config(&dir, &["no-such-archiver-a1"]));
        let handler = selector.select(false).unwrap();
        assert_eq!(handler.name(), "library");
    }

    #[test]
    fn test_application_dir_searched_first() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join(format!("archiver-b2{}", EXE_SUFFIX));
        fs::write(&tool, b"").unwrap();

        let selector = BackendSelector::from_config(&config(&dir, &["no-such-archiver-b1", "archiver-b2"]));
        assert_eq!(selector.find_executable(), Some(tool));

        let handler = selector.select(true).unwrap();
        assert_eq!(handler.name(), "process");
    }

    #[test]
    fn test_nothing_available() {
        let dir = TempDir::new().unwrap();
        let selector = BackendSelector::from_config(&config(&dir, &["no-such-archiver-c1", "no-such-archiver-c2"]))
            .without_library();

        let err = selector.select(false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(err.to_string().contains("no-such-archiver-c1"));
    }

    #[test]
    fn test_prefer_process_from_config() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, &["no-such-archiver-d1"]);
        cfg.prefer_process_backend = true;

        let err = BackendSelector::from_config(&cfg).select(false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }
}
