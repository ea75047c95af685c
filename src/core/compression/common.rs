// Backend handler trait and the worker-side progress callbacks

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use crate::models::{ArchiveError, ArchiveKind, OperationSpec};

/// Answer to a file-started event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDecision {
    Continue,
    Stop,
}

/// Callbacks a backend fires while it works
///
/// File boundaries are the only cooperative cancellation points: a backend
/// calls [`ProgressHooks::file_started`] before each file and stops when
/// told to.
pub trait ProgressHooks {
    /// `action` is a capitalised verb such as "Compressing"
    fn file_started(&self, action: &str, name: &str) -> FileDecision;

    fn progress(&self, percent: u8);

    fn phase(&self, text: &str);

    fn cancel_requested(&self) -> bool;
}

/// Hooks that ignore progress and never cancel
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressHooks for SilentProgress {
    fn file_started(&self, _action: &str, _name: &str) -> FileDecision {
        FileDecision::Continue
    }

    fn progress(&self, _percent: u8) {}

    fn phase(&self, _text: &str) {}

    fn cancel_requested(&self) -> bool {
        false
    }
}

/// One archive backend
///
/// `spec.archive_kind` is already resolved when these are called.
pub trait ArchiveHandler: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Whether percent progress is reported through [`ProgressHooks::progress`]
    fn reports_percent(&self) -> bool;

    fn compress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError>;

    fn decompress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError>;

    /// `Ok(false)` means the archive was read but is damaged
    fn test(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError>;
}

/// One archive format driven in-process
///
/// Readers take the archive as a list of volume files; a plain archive is a
/// one-element list.
pub trait FormatCodec: Send + Sync {
    fn kind(&self) -> ArchiveKind;

    /// Check the leading bytes of an archive
    fn sniff(&self, header: &[u8]) -> bool;

    /// Write `files` (relative to `base_dir`) into a new archive at `output`
    fn create(
        &self,
        output: &Path,
        base_dir: &Path,
        files: &[String],
        password: Option<&str>,
        hooks: &dyn ProgressHooks,
    ) -> Result<(), ArchiveError>;

    /// Names of every entry, in archive order
    fn entry_names(&self, volumes: &[PathBuf], password: Option<&str>) -> Result<Vec<String>, ArchiveError>;

    /// Extract into `dest_dir`; `selection` limits which entries are written
    fn extract(
        &self,
        volumes: &[PathBuf],
        dest_dir: &Path,
        selection: Option<&HashSet<String>>,
        password: Option<&str>,
        hooks: &dyn ProgressHooks,
    ) -> Result<(), ArchiveError>;

    /// Read every entry; `Ok(false)` when the data does not verify
    fn test(&self, volumes: &[PathBuf], password: Option<&str>, hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError>;
}

/// Destination of an archive entry below `dest_dir`.
///
/// Returns `None` for absolute names or names escaping `dest_dir`.
pub fn safe_entry_path(dest_dir: &Path, entry_name: &str) -> Option<PathBuf> {
    let relative = PathBuf::from(entry_name.replace('\\', "/"));
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(dest_dir.join(clean))
    }
}

/// Percent of `done` out of `total`, clamped to 100
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}
