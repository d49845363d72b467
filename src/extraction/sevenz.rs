use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Extract a 7z archive into `dest_path`
    ///
    /// Fails if any extracted entry resolves outside `dest_path`.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path)?;

        sevenz_rust::decompress_file(archive_path, dest_path).map_err(|e| Error::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to extract 7z archive: {}", e),
        })?;

        Self::validate_extracted_paths(archive_path, dest_path)?;
        let extracted_files = super::collect_files(dest_path)?;

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "7z extraction successful"
        );
        Ok(extracted_files)
    }

    /// Check that every extracted entry stays inside the destination directory
    fn validate_extracted_paths(archive_path: &Path, dest_path: &Path) -> Result<()> {
        let canonical_dest = dest_path.canonicalize()?;

        fn check_dir(dir: &Path, canonical_dest: &Path, archive_path: &Path) -> Result<()> {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                let canonical = path.canonicalize()?;

                if !canonical.starts_with(canonical_dest) {
                    return Err(Error::Extraction {
                        archive: archive_path.to_path_buf(),
                        reason: format!(
                            "path traversal detected: extracted file {:?} is outside destination",
                            canonical
                        ),
                    });
                }

                if path.is_dir() {
                    check_dir(&path, canonical_dest, archive_path)?;
                }
            }
            Ok(())
        }

        check_dir(dest_path, &canonical_dest, archive_path)
    }
}
