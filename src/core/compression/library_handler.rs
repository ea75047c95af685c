// In-process backend driving the zip and 7z codecs

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::core::compression::common::{ArchiveHandler, FormatCodec, ProgressHooks};
use crate::core::compression::sevenz_handler::SevenZHandler;
use crate::core::compression::zip_handler::ZipHandler;
use crate::core::file_ops::scanner::FileScanner;
use crate::core::file_ops::volumes::{
    canonical_archive_path, collect_volumes, is_archive_part, require_archive, split_into_volumes,
    MultiVolumeReader,
};
use crate::models::{ArchiveError, ArchiveKind, OperationSpec};

const HEADER_LEN: usize = 8;

/// Library-backed handler
///
/// Picks a codec by archive kind when compressing and by the archive's
/// leading bytes when reading.
pub struct LibraryHandler {
    codecs: Vec<Arc<dyn FormatCodec>>,
    scanner: FileScanner,
}

impl LibraryHandler {
    pub fn new() -> Self {
        let codecs: Vec<Arc<dyn FormatCodec>> = vec![
            Arc::new(SevenZHandler::new()),
            Arc::new(ZipHandler::new()),
        ];

        Self {
            codecs,
            scanner: FileScanner::new(),
        }
    }

    fn codec_for_kind(&self, kind: ArchiveKind) -> Result<Arc<dyn FormatCodec>, ArchiveError> {
        self.codecs
            .iter()
            .find(|codec| codec.kind() == kind)
            .cloned()
            .ok_or_else(|| ArchiveError::InvalidSpec(format!("Unsupported archive kind: {:?}", kind)))
    }

    /// Detect the codec from the archive header, falling back to the file name
    fn codec_for_archive(&self, volumes: &[PathBuf], spec: &OperationSpec) -> Result<Arc<dyn FormatCodec>, ArchiveError> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        MultiVolumeReader::open(volumes)?
            .take(HEADER_LEN as u64)
            .read_to_end(&mut header)?;

        if let Some(codec) = self.codecs.iter().find(|codec| codec.sniff(&header)) {
            return Ok(Arc::clone(codec));
        }

        let kind = match spec.archive_kind {
            ArchiveKind::Auto => ArchiveKind::from_path(&spec.archive_path),
            kind => kind,
        };
        self.codec_for_kind(kind).map_err(|_| ArchiveError::backend(
            "library",
            format!("Unrecognized archive format: {}", spec.archive_path.display()),
        ))
    }

    fn archive_volumes(&self, spec: &OperationSpec) -> Result<Vec<PathBuf>, ArchiveError> {
        let location = require_archive(&spec.archive_path)?;
        let volumes = collect_volumes(&location.path);
        debug!(
            archive = %location.path.display(),
            volumes = volumes.len(),
            multi_volume = location.multi_volume,
            "opening archive"
        );
        Ok(volumes)
    }

    /// Drop the archive being written (and its volumes) from the inputs
    fn without_output(&self, spec: &OperationSpec, files: Vec<String>) -> Vec<String> {
        let output = match canonical_archive_path(&spec.archive_path) {
            Some(output) => output,
            None => return files,
        };
        let output_name = match output.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return files,
        };

        files
            .into_iter()
            .filter(|name| {
                let file_name = name.rsplit('/').next().unwrap_or(name.as_str());
                if !file_name.starts_with(output_name.as_str()) {
                    return true;
                }
                let is_output = spec
                    .file_directory
                    .join(name)
                    .canonicalize()
                    .map_or(false, |path| is_archive_part(&path, &output));
                if is_output {
                    debug!(file = %name, "skipping the archive being written");
                }
                !is_output
            })
            .collect()
    }

    /// Entry names selected by the templates; `None` means every entry
    fn selection(
        &self,
        codec: &dyn FormatCodec,
        volumes: &[PathBuf],
        spec: &OperationSpec,
    ) -> Result<Option<HashSet<String>>, ArchiveError> {
        if spec.file_templates.is_empty() {
            return Ok(None);
        }

        let names = codec.entry_names(volumes, spec.password())?;
        let selected = self
            .scanner
            .filter_entries(names.iter().map(String::as_str), &spec.file_templates)?;
        Ok(Some(selected.into_iter().collect()))
    }
}

impl Default for LibraryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveHandler for LibraryHandler {
    fn name(&self) -> &str {
        "library"
    }

    fn reports_percent(&self) -> bool {
        true
    }

    fn compress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError> {
        let codec = self.codec_for_kind(spec.archive_kind)?;
        let templates = &spec.file_templates;

        let single_call = templates.is_empty()
            || (templates.len() == 1 && !templates[0].recurse && !templates[0].has_subdirectory());

        let files = if single_call {
            self.scanner.scan(&spec.file_directory, templates)?
        } else {
            hooks.phase("Building file list...");
            hooks.progress(0);
            self.scanner.scan(&spec.file_directory, templates)?
        };

        if let Some(parent) = spec.archive_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let files = self.without_output(spec, files);
        debug!(files = files.len(), archive = %spec.archive_path.display(), "compressing");

        codec.create(
            &spec.archive_path,
            &spec.file_directory,
            &files,
            spec.password(),
            hooks,
        )?;

        if spec.volume_size > 0 {
            if spec.archive_kind.supports_volumes() {
                split_into_volumes(&spec.archive_path, spec.volume_size)?;
            } else {
                warn!(kind = ?spec.archive_kind, "volume size ignored for this archive kind");
            }
        }

        Ok(())
    }

    fn decompress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError> {
        let volumes = self.archive_volumes(spec)?;
        let codec = self.codec_for_archive(&volumes, spec)?;
        let selection = self.selection(codec.as_ref(), &volumes, spec)?;

        codec.extract(
            &volumes,
            &spec.file_directory,
            selection.as_ref(),
            spec.password(),
            hooks,
        )
    }

    fn test(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError> {
        let volumes = self.archive_volumes(spec)?;
        // Unreadable volumes surface as IO errors before any decoding
        for volume in &volumes {
            File::open(volume)?;
        }
        let codec = self.codec_for_archive(&volumes, spec)?;
        codec.test(&volumes, spec.password(), hooks)
    }
}
