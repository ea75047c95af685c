use std::cell::Cell;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use sevenz_rust::{AesEncoderOptions, Password, SevenZArchiveEntry, SevenZMethod, SevenZReader, SevenZWriter};
use tracing::warn;
use crate::core::compression::common::{
    percent_of, safe_entry_path, FileDecision, FormatCodec, ProgressHooks,
};
use crate::core::file_ops::scanner::normalize_name;
use crate::core::file_ops::volumes::MultiVolumeReader;
use crate::models::{ArchiveError, ArchiveKind};

const BACKEND: &str = "7z";
const SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";

/// 7z codec backed by sevenz-rust
///
/// Writes LZMA2, with AES-256 content encryption when a password is given.
pub struct SevenZHandler;

impl SevenZHandler {
    pub fn new() -> Self {
        Self
    }

    fn open(volumes: &[PathBuf], password: Option<&str>) -> Result<SevenZReader<MultiVolumeReader>, ArchiveError> {
        let reader = MultiVolumeReader::open(volumes)?;
        let len = reader.len();
        SevenZReader::new(reader, len, to_password(password))
            .map_err(|e| ArchiveError::backend(BACKEND, format!("Failed to read 7z archive: {}", e)))
    }
}

fn to_password(password: Option<&str>) -> Password {
    match password {
        Some(pw) => Password::from(pw),
        None => Password::empty(),
    }
}

impl FormatCodec for SevenZHandler {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::SevenZip
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.starts_with(SIGNATURE)
    }

    /// Create a 7z archive from a list of files
    ///
    /// Files are streamed directly from disk; each file start is a
    /// cancellation point.
    fn create(
        &self,
        output: &Path,
        base_dir: &Path,
        files: &[String],
        password: Option<&str>,
        hooks: &dyn ProgressHooks,
    ) -> Result<(), ArchiveError> {
        let sizes: Vec<u64> = files
            .iter()
            .map(|name| fs::metadata(base_dir.join(name)).map(|m| m.len()).unwrap_or(0))
            .collect();
        let total: u64 = sizes.iter().sum();

        let file = File::create(output)
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to create 7z file {}: {}", output.display(), e),
            ))?;

        let mut writer = SevenZWriter::new(file)
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to create 7z writer: {}", e),
            ))?;

        if let Some(pw) = password {
            writer.set_content_methods(vec![
                AesEncoderOptions::new(Password::from(pw)).into(),
                SevenZMethod::LZMA2.into(),
            ]);
        }

        let mut done = 0u64;
        for (name, size) in files.iter().zip(&sizes) {
            if hooks.file_started("Compressing", name) == FileDecision::Stop {
                return Err(ArchiveError::UserCancelled);
            }

            let path = base_dir.join(name);
            let mut source = File::open(&path)
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to open file {}: {}", path.display(), e),
                ))?;

            writer.push_archive_entry(
                SevenZArchiveEntry::from_path(&path, name.clone()),
                Some(&mut source),
            )
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to add {} to archive: {}", name, e),
            ))?;

            done += size;
            hooks.progress(percent_of(done, total));
        }

        writer.finish()
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to finalize 7z archive: {}", e),
            ))?;

        Ok(())
    }

    fn entry_names(&self, volumes: &[PathBuf], password: Option<&str>) -> Result<Vec<String>, ArchiveError> {
        let reader = Self::open(volumes, password)?;
        Ok(reader
            .archive()
            .files
            .iter()
            .map(|entry| entry.name().to_string())
            .collect())
    }

    /// Extract 7z entries into `dest_dir`
    ///
    /// Unselected entries are still decoded (solid blocks must be read in
    /// order) but not written.
    fn extract(
        &self,
        volumes: &[PathBuf],
        dest_dir: &Path,
        selection: Option<&HashSet<String>>,
        password: Option<&str>,
        hooks: &dyn ProgressHooks,
    ) -> Result<(), ArchiveError> {
        let mut reader = Self::open(volumes, password)?;

        fs::create_dir_all(dest_dir)
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to create destination directory: {}", e),
            ))?;

        let count = reader.archive().files.len() as u64;
        let visited = Cell::new(0u64);
        let stopped = Cell::new(false);

        reader.for_each_entries(|entry, data| {
            // A `false` answer only ends the current folder
            if stopped.get() {
                return Ok(false);
            }
            visited.set(visited.get() + 1);
            let name = entry.name().to_string();

            let selected = selection.map_or(true, |s| s.contains(&name));
            let output_path = if selected { safe_entry_path(dest_dir, &name) } else { None };

            let output_path = match output_path {
                Some(path) => path,
                None => {
                    if selected {
                        warn!(entry = %name, "skipping entry outside the destination directory");
                    }
                    io::copy(data, &mut io::sink()).map_err(sevenz_rust::Error::io)?;
                    return Ok(true);
                }
            };

            if entry.is_directory() {
                fs::create_dir_all(&output_path).map_err(sevenz_rust::Error::io)?;
                return Ok(true);
            }

            if hooks.file_started("Extracting", &normalize_name(&name)) == FileDecision::Stop {
                stopped.set(true);
                return Ok(false);
            }

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent).map_err(sevenz_rust::Error::io)?;
            }
            let mut output_file = File::create(&output_path).map_err(sevenz_rust::Error::io)?;
            io::copy(data, &mut output_file).map_err(sevenz_rust::Error::io)?;

            hooks.progress(percent_of(visited.get(), count));
            Ok(true)
        })
        .map_err(|e| ArchiveError::backend(
            BACKEND,
            format!("Failed to extract 7z archive: {}", e),
        ))?;

        if stopped.get() {
            return Err(ArchiveError::UserCancelled);
        }
        Ok(())
    }

    fn test(&self, volumes: &[PathBuf], password: Option<&str>, hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError> {
        let reader = MultiVolumeReader::open(volumes)?;
        let len = reader.len();
        let mut archive = match SevenZReader::new(reader, len, to_password(password)) {
            Ok(archive) => archive,
            Err(e) => {
                warn!(error = %e, "7z archive failed to open");
                return Ok(false);
            }
        };

        let count = archive.archive().files.len() as u64;
        let visited = Cell::new(0u64);
        let stopped = Cell::new(false);

        let result = archive.for_each_entries(|entry, data| {
            if stopped.get() {
                return Ok(false);
            }
            visited.set(visited.get() + 1);
            if !entry.is_directory() {
                if hooks.file_started("Testing", &normalize_name(entry.name())) == FileDecision::Stop {
                    stopped.set(true);
                    return Ok(false);
                }
            }
            // Reading each stream to the end checks its CRC
            io::copy(data, &mut io::sink()).map_err(sevenz_rust::Error::io)?;
            hooks.progress(percent_of(visited.get(), count));
            Ok(true)
        });

        if stopped.get() {
            return Err(ArchiveError::UserCancelled);
        }
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "7z archive failed verification");
                Ok(false)
            }
        }
    }
}

impl Default for SevenZHandler {
    fn default() -> Self {
        Self::new()
    }
}
