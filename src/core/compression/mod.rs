// Archive compression modules
pub mod common;
pub mod exit_codes;
pub mod library_handler;
pub mod process_handler;
pub mod selector;
pub mod zip_handler;

#[path = "7z_handler.rs"]
pub mod sevenz_handler;

use std::fs;
use std::sync::Arc;
use tracing::{debug, info};
use crate::core::file_ops::volumes::require_archive;
use crate::models::{ArchiveError, BackendOverride, EngineConfig, OperationKind, OperationSpec};
use crate::utils::bridge::AsyncBridge;
use crate::utils::progress::ProgressSink;
use common::ArchiveHandler;
use selector::BackendSelector;

/// Public entry point for compress, extract and test
///
/// Workflow:
/// 1. Validate the operation
/// 2. Resolve the archive kind (compress only)
/// 3. Pick a backend
/// 4. Run it on a worker thread, relaying progress to the sink
pub struct ArchiveEngine {
    selector: BackendSelector,
    bridge: AsyncBridge,
}

impl ArchiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            selector: BackendSelector::from_config(&config),
            bridge: AsyncBridge::from_config(&config),
        }
    }

    pub fn with_parts(selector: BackendSelector, bridge: AsyncBridge) -> Self {
        Self { selector, bridge }
    }

    /// Compress files from `spec.file_directory` into `spec.archive_path`
    pub fn compress(&self, spec: &OperationSpec, sink: Option<&dyn ProgressSink>) -> Result<(), ArchiveError> {
        let mut spec = spec.clone();
        Self::validate(&spec, OperationKind::Compress)?;
        spec.resolve_kind();

        let handler = self.handler(&spec)?;
        self.run(OperationKind::Compress, handler, spec, sink, |handler, spec, hooks| {
            handler.compress(spec, hooks)
        })
    }

    /// Extract `spec.archive_path` into `spec.file_directory`, creating it if needed
    pub fn decompress(&self, spec: &OperationSpec, sink: Option<&dyn ProgressSink>) -> Result<(), ArchiveError> {
        Self::validate(spec, OperationKind::Decompress)?;
        let handler = self.handler(spec)?;
        fs::create_dir_all(&spec.file_directory)?;
        self.run(OperationKind::Decompress, handler, spec.clone(), sink, |handler, spec, hooks| {
            handler.decompress(spec, hooks)
        })
    }

    /// Verify an archive; `Ok(false)` when it is damaged
    pub fn test_archive(&self, spec: &OperationSpec, sink: Option<&dyn ProgressSink>) -> Result<bool, ArchiveError> {
        Self::validate(spec, OperationKind::Test)?;

        let handler = self.handler(spec)?;
        self.run(OperationKind::Test, handler, spec.clone(), sink, |handler, spec, hooks| {
            handler.test(spec, hooks)
        })
    }

    /// Checks that need no worker
    fn validate(spec: &OperationSpec, operation: OperationKind) -> Result<(), ArchiveError> {
        if spec.archive_path.as_os_str().is_empty() {
            return Err(ArchiveError::InvalidSpec("Archive path is not set".to_string()));
        }

        match operation {
            OperationKind::Compress => {
                if spec.file_directory.as_os_str().is_empty() {
                    return Err(ArchiveError::InvalidSpec("File directory is not set".to_string()));
                }
                if !spec.file_directory.is_dir() {
                    return Err(ArchiveError::SourceNotFound(spec.file_directory.clone()));
                }
            }
            OperationKind::Decompress => {
                if spec.file_directory.as_os_str().is_empty() {
                    return Err(ArchiveError::InvalidSpec("File directory is not set".to_string()));
                }
                require_archive(&spec.archive_path)?;
            }
            OperationKind::Test => {
                require_archive(&spec.archive_path)?;
            }
        }

        Ok(())
    }

    fn handler(&self, spec: &OperationSpec) -> Result<Arc<dyn ArchiveHandler>, ArchiveError> {
        let force_process = spec.backend_override == BackendOverride::Process;
        self.selector.select(force_process)
    }

    fn run<T, F>(
        &self,
        operation: OperationKind,
        handler: Arc<dyn ArchiveHandler>,
        spec: OperationSpec,
        sink: Option<&dyn ProgressSink>,
        call: F,
    ) -> Result<T, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ArchiveHandler, &OperationSpec, &dyn common::ProgressHooks) -> Result<T, ArchiveError>
            + Send
            + 'static,
    {
        info!(
            action = operation.action(),
            backend = handler.name(),
            archive = %spec.archive_path.display(),
            "starting archive operation"
        );

        let show_percent = handler.reports_percent();
        let result = self.bridge.run(operation.running_text(), show_percent, sink, move |hooks| {
            call(handler.as_ref(), &spec, hooks)
        });

        match &result {
            Ok(_) => debug!(action = operation.action(), "archive operation finished"),
            Err(e) => info!(action = operation.action(), error = %e, "archive operation failed"),
        }
        result
    }
}

impl Default for ArchiveEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArchiveKind, ErrorKind, FileTemplate};
    use crate::core::file_ops::scanner::FileScanner;
    use crate::utils::progress::SinkError;
    use std::cell::RefCell;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), b"test content a").unwrap();
        fs::write(dir.join("b.log"), b"test content b").unwrap();
        fs::write(dir.join("sub/c.txt"), b"test content c").unwrap();
    }

    fn extracted(dir: &Path) -> Vec<String> {
        FileScanner::new().scan(dir, &[FileTemplate::new("*", true)]).unwrap()
    }

    fn engine() -> ArchiveEngine {
        let bridge = AsyncBridge::new(Duration::from_millis(5), Duration::from_millis(1));
        let selector = BackendSelector::from_config(&EngineConfig::default());
        ArchiveEngine::with_parts(selector, bridge)
    }

    /// Records what the bridge relays
    #[derive(Default)]
    struct RecordingSink {
        phases: RefCell<Vec<String>>,
        percent_max: RefCell<Option<u8>>,
    }

    impl ProgressSink for RecordingSink {
        fn set_phase_text(&self, text: &str) {
            self.phases.borrow_mut().push(text.to_string());
        }
        fn set_percent(&self, _percent: u8) {}
        fn set_percent_max(&self, max: u8) {
            *self.percent_max.borrow_mut() = Some(max);
        }
        fn set_allow_cancel(&self, _allow: bool) {}
        fn check_cancelled(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_zip() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        create_test_files(source.path());

        let engine = engine();
        let archive = out.path().join("round.zip");
        let sink = RecordingSink::default();
        engine.compress(&OperationSpec::new(&archive, source.path()), Some(&sink)).unwrap();
        assert_eq!(*sink.percent_max.borrow(), Some(100));

        engine.decompress(&OperationSpec::new(&archive, dest.path()), None).unwrap();
        assert_eq!(extracted(dest.path()), vec!["a.txt", "b.log"]);
        assert_eq!(fs::read(dest.path().join("b.log")).unwrap(), b"test content b");
    }

    #[test]
    fn test_template_selection() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        create_test_files(source.path());
        let engine = engine();

        let flat = out.path().join("flat.7z");
        engine
            .compress(&OperationSpec::new(&flat, source.path()).with_template("*.txt", false), None)
            .unwrap();
        let dest = TempDir::new().unwrap();
        engine.decompress(&OperationSpec::new(&flat, dest.path()), None).unwrap();
        assert_eq!(extracted(dest.path()), vec!["a.txt"]);

        let deep = out.path().join("deep.7z");
        engine
            .compress(&OperationSpec::new(&deep, source.path()).with_template("*.txt", true), None)
            .unwrap();
        let dest = TempDir::new().unwrap();
        engine.decompress(&OperationSpec::new(&deep, dest.path()), None).unwrap();
        assert_eq!(extracted(dest.path()), vec!["a.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_archive_integrity() {
        let source = TempDir::new().unwrap();
        create_test_files(source.path());
        let engine = engine();

        let archive = source.path().join("check.7z");
        let spec = OperationSpec::new(&archive, source.path()).with_kind(ArchiveKind::SevenZip);
        engine.compress(&spec, None).unwrap();
        assert!(engine.test_archive(&spec, None).unwrap());
    }

    #[test]
    fn test_decompress_creates_directory() {
        let source = TempDir::new().unwrap();
        create_test_files(source.path());
        let engine = engine();

        let archive = source.path().join("out.zip");
        engine.compress(&OperationSpec::new(&archive, source.path()), None).unwrap();

        let dest = source.path().join("new/target");
        engine.decompress(&OperationSpec::new(&archive, &dest), None).unwrap();
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn test_validation_errors() {
        let temp = TempDir::new().unwrap();
        let engine = engine();

        let err = engine.compress(&OperationSpec::new("", temp.path()), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);

        let err = engine
            .compress(&OperationSpec::new(temp.path().join("a.zip"), ""), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);

        let err = engine
            .compress(&OperationSpec::new(temp.path().join("a.zip"), temp.path().join("missing")), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);

        let err = engine
            .decompress(&OperationSpec::new(temp.path().join("none.7z"), temp.path()), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveNotFound);

        let err = engine
            .test_archive(&OperationSpec::new(temp.path().join("none.7z"), temp.path()), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveNotFound);
    }

    #[test]
    fn test_unavailable_backend_leaves_no_directory() {
        let source = TempDir::new().unwrap();
        create_test_files(source.path());
        let archive = source.path().join("out.zip");
        engine().compress(&OperationSpec::new(&archive, source.path()), None).unwrap();

        let config = EngineConfig {
            executable_candidates: vec!["no-such-archiver-e1".to_string()],
            application_dir: Some(source.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let selector = BackendSelector::from_config(&config).without_library();
        let engine = ArchiveEngine::with_parts(selector, AsyncBridge::default());

        let dest = source.path().join("never-created");
        let err = engine
            .decompress(&OperationSpec::new(&archive, &dest), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(!dest.exists());
    }

    #[test]
    fn test_recompress_into_source_directory() {
        let source = TempDir::new().unwrap();
        create_test_files(source.path());
        let engine = engine();

        let archive = source.path().join("self.zip");
        let spec = OperationSpec::new(&archive, source.path());
        engine.compress(&spec, None).unwrap();
        let first_size = fs::metadata(&archive).unwrap().len();
        engine.compress(&spec, None).unwrap();
        assert_eq!(fs::metadata(&archive).unwrap().len(), first_size);

        let dest = TempDir::new().unwrap();
        engine.decompress(&OperationSpec::new(&archive, dest.path()), None).unwrap();
        assert_eq!(extracted(dest.path()), vec!["a.txt", "b.log"]);
    }

    #[test]
    fn test_worker_error_is_rethrown() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, b"PK\x03\x04 truncated").unwrap();

        let dest = TempDir::new().unwrap();
        let err = engine()
            .decompress(&OperationSpec::new(&archive, dest.path()), None)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::BackendExecution { .. }));
    }
}
