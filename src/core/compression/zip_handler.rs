use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter, write::FileOptions};
use crate::core::compression::common::{
    percent_of, safe_entry_path, FileDecision, FormatCodec, ProgressHooks,
};
use crate::core::file_ops::volumes::MultiVolumeReader;
use crate::models::{ArchiveError, ArchiveKind};

const BACKEND: &str = "zip";

/// ZIP codec
///
/// Writes Deflate (or Stored for already-compressed data) entries, with
/// AES-256 encryption when a password is given.
pub struct ZipHandler;

impl ZipHandler {
    pub fn new() -> Self {
        Self
    }

    fn open(volumes: &[PathBuf]) -> Result<ZipArchive<MultiVolumeReader>, ArchiveError> {
        let reader = MultiVolumeReader::open(volumes)?;
        ZipArchive::new(reader)
            .map_err(|e| ArchiveError::backend(BACKEND, format!("Failed to read ZIP archive: {}", e)))
    }
}

impl FormatCodec for ZipHandler {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.starts_with(b"PK\x03\x04")
            || header.starts_with(b"PK\x05\x06")
            || header.starts_with(b"PK\x07\x08")
    }

    /// Create a ZIP archive from a list of files
    ///
    /// # Behavior
    /// - Already-compressed formats (PNG, JPG, MP3…) are stored without re-compression
    /// - Each file start is a cancellation point; a stopped archive is left as written
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
                format!("Failed to create ZIP file {}: {}", output.display(), e),
            ))?;
        let mut zip = ZipWriter::new(file);
        let mut done = 0u64;

        for (name, size) in files.iter().zip(&sizes) {
            if hooks.file_started("Compressing", name) == FileDecision::Stop {
                return Err(ArchiveError::UserCancelled);
            }

            zip.start_file(name.as_str(), entry_options(name, password))
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to start file {} in archive: {}", name, e),
                ))?;

            let source_path = base_dir.join(name);
            let mut source = File::open(&source_path)
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to open file {}: {}", source_path.display(), e),
                ))?;
            io::copy(&mut source, &mut zip)
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to write file {} to archive: {}", name, e),
                ))?;

            done += size;
            hooks.progress(percent_of(done, total));
        }

        zip.finish()
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to finalize ZIP archive: {}", e),
            ))?;

        Ok(())
    }

    fn entry_names(&self, volumes: &[PathBuf], _password: Option<&str>) -> Result<Vec<String>, ArchiveError> {
        let archive = Self::open(volumes)?;
        Ok(archive.file_names().map(str::to_string).collect())
    }

    /// Extract ZIP entries into `dest_dir`
    ///
    /// # Behavior
    /// - Preserves directory hierarchy, creating parents as needed
    /// - Skips entries whose names would escape `dest_dir`
    /// - Sets file permissions on Unix systems
    fn extract(
        &self,
        volumes: &[PathBuf],
        dest_dir: &Path,
        selection: Option<&HashSet<String>>,
        password: Option<&str>,
        hooks: &dyn ProgressHooks,
    ) -> Result<(), ArchiveError> {
        let mut archive = Self::open(volumes)?;

        fs::create_dir_all(dest_dir)
            .map_err(|e| ArchiveError::backend(
                BACKEND,
                format!("Failed to create destination directory: {}", e),
            ))?;

        let count = archive.len();
        for i in 0..count {
            let entry = match password {
                Some(pw) => archive.by_index_decrypt(i, pw.as_bytes()),
                None => archive.by_index(i),
            };
            let mut file = entry
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to read file at index {}: {}", i, e),
                ))?;

            let name = file.name().to_string();
            if selection.map_or(false, |selected| !selected.contains(&name)) {
                continue;
            }

            let output_path = match safe_entry_path(dest_dir, &name) {
                Some(path) => path,
                None => {
                    warn!(entry = %name, "skipping entry outside the destination directory");
                    continue;
                }
            };

            if file.is_dir() {
                fs::create_dir_all(&output_path)
                    .map_err(|e| ArchiveError::backend(
                        BACKEND,
                        format!("Failed to create directory {}: {}", output_path.display(), e),
                    ))?;
                continue;
            }

            if hooks.file_started("Extracting", &name) == FileDecision::Stop {
                return Err(ArchiveError::UserCancelled);
            }

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| ArchiveError::backend(
                        BACKEND,
                        format!("Failed to create parent directory {}: {}", parent.display(), e),
                    ))?;
            }

            let mut output_file = File::create(&output_path)
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to create output file {}: {}", output_path.display(), e),
                ))?;
            io::copy(&mut file, &mut output_file)
                .map_err(|e| ArchiveError::backend(
                    BACKEND,
                    format!("Failed to extract file {}: {}", name, e),
                ))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    fs::set_permissions(&output_path, fs::Permissions::from_mode(mode))
                        .map_err(|e| ArchiveError::backend(
                            BACKEND,
                            format!("Failed to set permissions: {}", e),
                        ))?;
                }
            }

            hooks.progress(percent_of(i as u64 + 1, count as u64));
        }

        Ok(())
    }

    fn test(&self, volumes: &[PathBuf], password: Option<&str>, hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError> {
        let reader = MultiVolumeReader::open(volumes)?;
        let mut archive = match ZipArchive::new(reader) {
            Ok(archive) => archive,
            Err(e) => {
                warn!(error = %e, "ZIP archive failed to open");
                return Ok(false);
            }
        };

        let count = archive.len();
        for i in 0..count {
            let entry = match password {
                Some(pw) => archive.by_index_decrypt(i, pw.as_bytes()),
                None => archive.by_index(i),
            };
            let mut file = match entry {
                Ok(file) => file,
                Err(e) => {
                    warn!(index = i, error = %e, "ZIP entry unreadable");
                    return Ok(false);
                }
            };
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if hooks.file_started("Testing", &name) == FileDecision::Stop {
                return Err(ArchiveError::UserCancelled);
            }

            // Reading to the end verifies the CRC
            if let Err(e) = io::copy(&mut file, &mut io::sink()) {
                warn!(entry = %name, error = %e, "ZIP entry failed verification");
                return Ok(false);
            }
            hooks.progress(percent_of(i as u64 + 1, count as u64));
        }

        Ok(true)
    }
}

fn entry_options<'k>(name: &str, password: Option<&'k str>) -> FileOptions<'k, ()> {
    // Already-compressed formats: store as-is
    let options = if is_already_compressed(name) {
        FileOptions::<()>::default().compression_method(CompressionMethod::Stored)
    } else {
        FileOptions::<()>::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(6))
    };
    let options = options.unix_permissions(0o644);

    match password {
        Some(pw) => options.with_aes_encryption(AesMode::Aes256, pw),
        None => options,
    }
}

/// Returns true for formats that are already compressed and won't benefit from Deflate.
fn is_already_compressed(name: &str) -> bool {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "webp"
            | "mp3" | "mp4" | "ogg" | "wav" | "aac" | "flac"
            | "zip" | "7z" | "rar" | "gz" | "xz" | "zst"
    )
}

impl Default for ZipHandler {
    fn default() -> Self {
        Self::new()
    }
}
