//! Zip archive extraction logic.

use crate::error::SyncError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Number of trailing stem characters used to partition covers.
const COVER_PARTITION_LEN: usize = 4;

/// Directory under the covers target holding one marker per extracted archive.
const COVER_MARKER_DIR: &str = ".extracted";

/// What an extraction call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
    /// Number of files written.
    Extracted(usize),
    /// The target directory already existed; nothing was written.
    AlreadyExtracted,
}

/// Extracts a whole archive into `target_dir`, unless it already exists.
///
/// Entries are written to a `.partial` sibling that is renamed into place
/// once complete, so an interrupted extraction is retried next time.
pub fn extract_zip(archive: &Path, target_dir: &Path) -> Result<ExtractStatus, SyncError> {
    if target_dir.is_dir() {
        debug!("{} already extracted", target_dir.display());
        return Ok(ExtractStatus::AlreadyExtracted);
    }

    let staging = staging_dir(target_dir);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }

    let written = match unpack_entries(archive, |name| Some(staging.join(name))) {
        Ok(written) => written,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
    };
    // An archive with no entries still marks the target as extracted.
    std::fs::create_dir_all(&staging)?;
    std::fs::rename(&staging, target_dir)?;
    Ok(ExtractStatus::Extracted(written))
}

/// Extracts cover images into subfolders named after the last four
/// characters of each entry's stem (`9780306406157.jpg` lands in
/// `target_dir/6157/`), spreading files for faster lookup.
///
/// Existing files are overwritten. Once every entry is written a marker is
/// left for the archive, see [`is_cover_extracted`].
pub fn extract_cover_zip(archive: &Path, target_dir: &Path) -> Result<ExtractStatus, SyncError> {
    let written = unpack_entries(archive, |name| {
        let partition = cover_partition(name)?;
        Some(target_dir.join(partition).join(name))
    })?;

    let marker = cover_marker_path(archive, target_dir);
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&marker, written.to_string())?;
    Ok(ExtractStatus::Extracted(written))
}

/// Whether `archive` was fully extracted into `target_dir` by an earlier
/// [`extract_cover_zip`] call.
pub fn is_cover_extracted(archive: &Path, target_dir: &Path) -> bool {
    cover_marker_path(archive, target_dir).is_file()
}

fn cover_marker_path(archive: &Path, target_dir: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".done");
    target_dir.join(COVER_MARKER_DIR).join(name)
}

/// Last four characters of the entry's file stem.
fn cover_partition(name: &Path) -> Option<String> {
    let stem = name.file_stem()?.to_str()?;
    let chars: Vec<char> = stem.chars().collect();
    let start = chars.len().saturating_sub(COVER_PARTITION_LEN);
    let partition: String = chars[start..].iter().collect();
    (!partition.is_empty()).then_some(partition)
}

/// Writes every file entry of `archive` to the path chosen by `destination`.
///
/// Entries whose names escape the archive root, or for which `destination`
/// returns `None`, are skipped.
fn unpack_entries<F>(archive: &Path, destination: F) -> Result<usize, SyncError>
where
    F: Fn(&Path) -> Option<PathBuf>,
{
    let failed = |reason: String| SyncError::Extract {
        archive: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| failed(e.to_string()))?;
    let mut written = 0;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| failed(format!("failed to read entry {}: {}", index, e)))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(
                "Skipping entry with unsafe path {:?} in {}",
                entry.name(),
                archive.display()
            );
            continue;
        };
        let Some(out_path) = destination(&name) else {
            warn!(
                "Skipping entry {} in {}",
                name.display(),
                archive.display()
            );
            continue;
        };

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| failed(format!("failed to write {}: {}", out_path.display(), e)))?;
        written += 1;
    }
    Ok(written)
}

fn staging_dir(target_dir: &Path) -> PathBuf {
    let mut name = target_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target_dir.with_file_name(name)
}

/// Counts files under `dir` (recursively) with the given extension.
///
/// A missing directory counts as zero.
pub fn count_files_matching(dir: &Path, extension: &str) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .count()
}
