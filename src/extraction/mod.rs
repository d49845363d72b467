//! Archive detection and unpacking
//!
//! Archives found among acquired files are unpacked into a scratch directory and
//! routed through delivery again. ZIP and 7z are supported; the archive kind is
//! chosen by extension.

mod sevenz;
mod zip;

pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

/// Supported archive formats
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// ZIP archive (.zip)
    Zip,
    /// 7-Zip archive (.7z)
    SevenZip,
}

/// Archive kind of `path`, judged by its extension
///
/// # Examples
///
/// ```
/// use media_ferry::extraction::{detect_archive_kind, ArchiveKind};
/// use std::path::Path;
///
/// assert_eq!(detect_archive_kind(Path::new("pack.ZIP")), Some(ArchiveKind::Zip));
/// assert_eq!(detect_archive_kind(Path::new("clip.mp4")), None);
/// ```
pub fn detect_archive_kind(path: &Path) -> Option<ArchiveKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "zip" => Some(ArchiveKind::Zip),
        "7z" => Some(ArchiveKind::SevenZip),
        _ => None,
    }
}

/// Whether `path` should be unpacked, given the configured archive extensions
///
/// Only extensions this module can actually unpack are honoured.
pub fn is_archive(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    detect_archive_kind(path).is_some() && extensions.iter().any(|x| x.eq_ignore_ascii_case(ext))
}

/// Unpack `archive` into `dest`, returning the extracted files
///
/// Blocking; use [`extract_archive_async`] from async code.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let kind = detect_archive_kind(archive).ok_or_else(|| Error::Extraction {
        archive: archive.to_path_buf(),
        reason: format!("unknown archive type for file: {}", archive.display()),
    })?;

    debug!(?archive, ?kind, ?dest, "dispatching extraction");
    match kind {
        ArchiveKind::Zip => ZipExtractor::extract(archive, dest),
        ArchiveKind::SevenZip => SevenZipExtractor::extract(archive, dest),
    }
}

/// Unpack `archive` into `dest` on the blocking pool, then hoist nested files into `dest`
pub async fn extract_archive_async(archive: &Path, dest: &Path) -> Result<usize> {
    let archive_owned = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();

    let count = spawn_blocking(move || -> Result<usize> {
        let files = extract_archive(&archive_owned, &dest_owned)?;
        crate::utils::flatten_dir(&dest_owned)?;
        Ok(files.len())
    })
    .await
    .map_err(|e| Error::Extraction {
        archive: archive.to_path_buf(),
        reason: format!("extraction task panicked: {}", e),
    })??;

    info!(?archive, extracted = count, "archive unpacked");
    Ok(count)
}

/// Recursively collect all files (not directories) below `dir`
pub(crate) fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fn visit_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit_dir(&path, files)?;
            } else {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    visit_dir(dir, &mut files)?;
    files.sort();
    Ok(files)
}
