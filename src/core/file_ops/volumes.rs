use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::models::ArchiveError;

/// Suffix of the first volume of a split archive
pub const FIRST_VOLUME_SUFFIX: &str = ".001";

/// Where an archive was found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub path: PathBuf,
    /// True when the literal path was missing and `.001` was used instead
    pub multi_volume: bool,
}

/// Path of volume `index` (1-based): `data.7z` -> `data.7z.003`
pub fn volume_path(archive_path: &Path, index: usize) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(format!(".{:03}", index));
    PathBuf::from(name)
}

pub fn first_volume_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(FIRST_VOLUME_SUFFIX);
    PathBuf::from(name)
}

/// Find the archive or, failing that, its first volume
pub fn locate_archive(archive_path: &Path) -> Option<ArchiveLocation> {
    if archive_path.is_file() {
        return Some(ArchiveLocation {
            path: archive_path.to_path_buf(),
            multi_volume: false,
        });
    }

    let first = first_volume_path(archive_path);
    if first.is_file() {
        return Some(ArchiveLocation {
            path: first,
            multi_volume: true,
        });
    }

    None
}

/// Like [`locate_archive`], failing with `ArchiveNotFound`
pub fn require_archive(archive_path: &Path) -> Result<ArchiveLocation, ArchiveError> {
    locate_archive(archive_path).ok_or_else(|| ArchiveError::ArchiveNotFound(archive_path.to_path_buf()))
}

/// Canonical form of `archive_path`, which need not exist yet
pub fn canonical_archive_path(archive_path: &Path) -> Option<PathBuf> {
    if let Ok(path) = archive_path.canonicalize() {
        return Some(path);
    }
    let name = archive_path.file_name()?;
    let parent = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parent.canonicalize().ok().map(|dir| dir.join(name))
}

/// True when `candidate` is `archive` or one of its numbered volumes
pub fn is_archive_part(candidate: &Path, archive: &Path) -> bool {
    if candidate == archive {
        return true;
    }
    if candidate.parent() != archive.parent() {
        return false;
    }
    let (candidate, archive) = match (
        candidate.file_name().and_then(|n| n.to_str()),
        archive.file_name().and_then(|n| n.to_str()),
    ) {
        (Some(candidate), Some(archive)) => (candidate, archive),
        _ => return false,
    };
    candidate
        .strip_prefix(archive)
        .and_then(|rest| rest.strip_prefix('.'))
        .map_or(false, |digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Base path when `path` names a numbered volume (`x.7z.001` -> `x.7z`)
fn volume_base(path: &Path) -> Option<PathBuf> {
    if path.extension()?.to_str()? == "001" {
        Some(path.with_extension(""))
    } else {
        None
    }
}

/// All consecutive volumes starting at `first` (`.001`, `.002`, ...)
pub fn collect_volumes(first: &Path) -> Vec<PathBuf> {
    let base = match volume_base(first) {
        Some(base) => base,
        None => return vec![first.to_path_buf()],
    };

    let mut volumes = Vec::new();
    let mut index = 1;
    loop {
        let path = volume_path(&base, index);
        if !path.is_file() {
            break;
        }
        volumes.push(path);
        index += 1;
    }
    volumes
}

/// Split a finished archive into volumes of at most `volume_size` bytes.
///
/// The unsplit file is removed afterwards. Returns the volume paths.
pub fn split_into_volumes(archive_path: &Path, volume_size: u64) -> Result<Vec<PathBuf>, ArchiveError> {
    if volume_size == 0 {
        return Err(ArchiveError::InvalidSpec("Volume size must be positive".to_string()));
    }

    let mut source = File::open(archive_path)?;
    let total = source.metadata()?.len();
    let mut volumes = Vec::new();
    let mut written = 0u64;

    // An empty archive still gets one (empty) volume
    while written < total || volumes.is_empty() {
        let path = volume_path(archive_path, volumes.len() + 1);
        let mut out = File::create(&path)?;
        let copied = io::copy(&mut (&mut source).take(volume_size), &mut out)?;
        out.flush()?;
        written += copied;
        volumes.push(path);
        if copied == 0 {
            break;
        }
    }

    drop(source);
    fs::remove_file(archive_path)?;
    debug!(archive = %archive_path.display(), volumes = volumes.len(), "archive split into volumes");
    Ok(volumes)
}

/// Reads a sequence of volume files as one continuous stream
pub struct MultiVolumeReader {
    volumes: Vec<File>,
    /// Start offset of each volume within the joined stream
    offsets: Vec<u64>,
    total_len: u64,
    position: u64,
}

impl MultiVolumeReader {
    pub fn open(paths: &[PathBuf]) -> Result<Self, ArchiveError> {
        let mut volumes = Vec::with_capacity(paths.len());
        let mut offsets = Vec::with_capacity(paths.len());
        let mut total_len = 0u64;

        for path in paths {
            let file = File::open(path)?;
            offsets.push(total_len);
            total_len += file.metadata()?.len();
            volumes.push(file);
        }

        Ok(Self {
            volumes,
            offsets,
            total_len,
            position: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    fn volume_at(&self, position: u64) -> Option<usize> {
        if position >= self.total_len {
            return None;
        }
        match self.offsets.binary_search(&position) {
            Ok(mut index) => {
                // Skip empty volumes sharing the same offset
                while index + 1 < self.offsets.len() && self.offsets[index + 1] == position {
                    index += 1;
                }
                Some(index)
            }
            Err(index) => Some(index - 1),
        }
    }
}

impl Read for MultiVolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let index = match self.volume_at(self.position) {
            Some(index) => index,
            None => return Ok(0),
        };

        let local = self.position - self.offsets[index];
        let volume_end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.total_len);
        let remaining = (volume_end - self.position) as usize;
        let want = buf.len().min(remaining);

        let file = &mut self.volumes[index];
        file.seek(SeekFrom::Start(local))?;
        let read = file.read(&mut buf[..want])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for MultiVolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.total_len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };

        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of archive",
            )),
        }
    }
}
