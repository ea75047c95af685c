use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Container format of an archive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ArchiveKind {
    /// Resolved from the archive file extension before a handler runs
    #[default]
    Auto,
    SevenZip,
    Zip,
    Unknown,
}

impl ArchiveKind {
    /// Detect the kind from a file name, case-insensitively.
    ///
    /// A numbered volume suffix (`.001`) is skipped, so `data.7z.001`
    /// resolves the same way as `data.7z`.
    pub fn from_path(path: &Path) -> Self {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_ascii_lowercase(),
            None => return ArchiveKind::Unknown,
        };

        let mut parts = name.rsplit('.');
        let mut ext = parts.next().unwrap_or("");
        if ext.len() == 3 && ext.bytes().all(|b| b.is_ascii_digit()) {
            ext = parts.next().unwrap_or("");
        }
        if ext == name {
            return ArchiveKind::Unknown;
        }

        match ext {
            "7z" => ArchiveKind::SevenZip,
            "zip" => ArchiveKind::Zip,
            _ => ArchiveKind::Unknown,
        }
    }

    /// Format name as understood by the external tool's `-t` switch
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            ArchiveKind::SevenZip => Some("7z"),
            ArchiveKind::Zip => Some("zip"),
            ArchiveKind::Auto | ArchiveKind::Unknown => None,
        }
    }

    /// Whether the format can be written as a split, multi-volume archive
    pub fn supports_volumes(&self) -> bool {
        matches!(self, ArchiveKind::SevenZip)
    }
}

/// A wildcard pattern plus its recursion flag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileTemplate {
    pub pattern: String,
    #[serde(default)]
    pub recurse: bool,
}

impl FileTemplate {
    pub fn new(pattern: impl Into<String>, recurse: bool) -> Self {
        Self {
            pattern: pattern.into(),
            recurse,
        }
    }

    /// True when the pattern names something below the base directory
    pub fn has_subdirectory(&self) -> bool {
        self.pattern.contains('/') || self.pattern.contains('\\')
    }
}

/// Forced backend choice, mostly for diagnostics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BackendOverride {
    #[default]
    Auto,
    Process,
}

/// The three operations a backend can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Compress,
    Decompress,
    Test,
}

impl OperationKind {
    /// Verb used in messages and phase text
    pub fn action(&self) -> &'static str {
        match self {
            OperationKind::Compress => "compress",
            OperationKind::Decompress => "extract",
            OperationKind::Test => "test",
        }
    }

    /// Initial phase text shown while the worker starts
    pub fn running_text(&self) -> &'static str {
        match self {
            OperationKind::Compress => "Compressing...",
            OperationKind::Decompress => "Extracting...",
            OperationKind::Test => "Testing...",
        }
    }
}

/// Everything a backend needs to compress, extract or test one archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Archive file, or the first volume of a split archive
    pub archive_path: PathBuf,
    /// Directory to compress from or extract into
    #[serde(default)]
    pub file_directory: PathBuf,
    /// Empty means every file in `file_directory`, non-recursive
    #[serde(default)]
    pub file_templates: Vec<FileTemplate>,
    #[serde(default)]
    pub archive_kind: ArchiveKind,
    /// Bytes per volume; 0 disables splitting
    #[serde(default)]
    pub volume_size: u64,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub backend_override: BackendOverride,
}

impl OperationSpec {
    pub fn new(archive_path: impl Into<PathBuf>, file_directory: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            file_directory: file_directory.into(),
            ..Self::default()
        }
    }

    pub fn with_template(mut self, pattern: impl Into<String>, recurse: bool) -> Self {
        self.file_templates.push(FileTemplate::new(pattern, recurse));
        self
    }

    pub fn with_kind(mut self, kind: ArchiveKind) -> Self {
        self.archive_kind = kind;
        self
    }

    pub fn with_volume_size(mut self, volume_size: u64) -> Self {
        self.volume_size = volume_size;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_backend_override(mut self, backend_override: BackendOverride) -> Self {
        self.backend_override = backend_override;
        self
    }

    /// Password, treating an empty string as absent
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Replace `Auto` with the kind implied by the archive extension.
    /// Has no effect once the kind is concrete.
    pub fn resolve_kind(&mut self) {
        if self.archive_kind == ArchiveKind::Auto {
            self.archive_kind = ArchiveKind::from_path(&self.archive_path);
        }
    }
}
