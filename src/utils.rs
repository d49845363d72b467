//! Utility functions for file operations and path manipulation

use crate::error::{Error, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Prefix shared by every scratch directory the pipeline creates
pub const SCRATCH_PREFIX: &str = "ferry-";

/// Longest extension taken from a URL before falling back
const MAX_URL_EXTENSION_LEN: usize = 10;

/// A working directory that is removed when it goes out of scope
///
/// Every directory created by acquisition, extraction or segmentation is one of
/// these, so an early return or a `?` can never leave it behind. Use [`ScratchDir::close`]
/// to observe removal errors; dropping removes silently.
#[derive(Debug)]
pub struct ScratchDir {
    inner: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory named `ferry-<label>-<random>` under `root`
    ///
    /// `root` is created if it does not exist yet.
    pub fn new_in(root: &Path, label: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let inner = tempfile::Builder::new()
            .prefix(&format!("{SCRATCH_PREFIX}{label}-"))
            .tempdir_in(root)?;
        debug!(path = ?inner.path(), "created scratch directory");
        Ok(Self { inner })
    }

    /// Path of the directory
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Remove the directory now, reporting failures
    pub fn close(self) -> Result<()> {
        let path = self.inner.path().to_path_buf();
        self.inner.close().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to remove scratch directory {}: {}", path.display(), e),
            ))
        })?;
        debug!(?path, "removed scratch directory");
        Ok(())
    }
}

impl AsRef<Path> for ScratchDir {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

/// Random 32 character hex identifier used for artifact names
pub fn random_stem() -> String {
    let n: u128 = rand::thread_rng().r#gen();
    format!("{n:032x}")
}

/// Best-effort extension from the last segment of a URL path
///
/// Returns `None` for URLs without a usable extension (no dot, non-alphanumeric
/// characters, or suspiciously long).
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_URL_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Unique file name for the artifact downloaded from `url`
///
/// # Examples
///
/// ```
/// use media_ferry::utils::file_name_for_url;
///
/// let name = file_name_for_url("https://cdn.example.com/v/clip.webm?sig=1", "mp4");
/// assert!(name.ends_with(".webm"));
///
/// let name = file_name_for_url("https://cdn.example.com/stream/abc", "mp4");
/// assert!(name.ends_with(".mp4"));
/// ```
pub fn file_name_for_url(url: &str, fallback_extension: &str) -> String {
    let ext = url_extension(url).unwrap_or_else(|| fallback_extension.to_string());
    format!("{}.{}", random_stem(), ext)
}

/// Get a path that does not exist yet, adding ` (1)`, ` (2)`, ... before the extension
///
/// # Examples
///
/// ```
/// use media_ferry::utils::unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/clip-that-does-not-exist.mp4");
/// assert_eq!(unique_path(path).unwrap(), path);
/// ```
pub fn unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem of {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!(
            "cannot extract parent directory of {}",
            path.display()
        ))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find unique filename for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Move a file, falling back to copy + remove across filesystems
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

/// Regular files directly inside `dir`, sorted by name
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Hoist every file below `root` into `root` itself and remove the emptied subdirectories
///
/// Name collisions are resolved with [`unique_path`]. Returns the number of files moved.
pub fn flatten_dir(root: &Path) -> Result<usize> {
    fn hoist(dir: &Path, root: &Path, moved: &mut usize) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                hoist(&path, root, moved)?;
                if let Err(e) = std::fs::remove_dir(&path) {
                    warn!(?path, error = %e, "subdirectory not empty after flattening, removing");
                    std::fs::remove_dir_all(&path)?;
                }
            } else if dir != root {
                let Some(name) = path.file_name() else {
                    continue;
                };
                let target = unique_path(&root.join(name))?;
                std::fs::rename(&path, &target)?;
                *moved += 1;
            }
        }
        Ok(())
    }

    let mut moved = 0;
    hoist(root, root, &mut moved)?;
    debug!(?root, moved, "flattened directory");
    Ok(moved)
}
