use crate::error::{ExtractionError, Result};
use crate::module::ModuleVersion;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extracts module zip archives whose entries live under `path@version/`
pub struct ModuleUnzipper;

impl ModuleUnzipper {
    fn invalid(archive_path: &Path, reason: impl Into<String>) -> ExtractionError {
        ExtractionError::InvalidArchive {
            archive: archive_path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Resolve an entry name to its destination, stripping the module prefix
    ///
    /// Returns `Ok(None)` for the prefix directory entry itself.
    fn entry_destination(
        file: &::zip::read::ZipFile<'_>,
        prefix: &Path,
        dest_path: &Path,
        archive_path: &Path,
    ) -> std::result::Result<Option<PathBuf>, ExtractionError> {
        let enclosed = file.enclosed_name().ok_or_else(|| {
            Self::invalid(archive_path, format!("unsafe entry path {:?}", file.name()))
        })?;

        let relative = enclosed.strip_prefix(prefix).map_err(|_| {
            Self::invalid(
                archive_path,
                format!(
                    "entry {:?} is outside module prefix {}",
                    file.name(),
                    prefix.display()
                ),
            )
        })?;

        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        Ok(Some(dest_path.join(relative)))
    }

    /// Extract a single entry to disk, creating directories as needed
    fn extract_entry(
        mut file: ::zip::read::ZipFile<'_>,
        file_path: PathBuf,
    ) -> Result<Option<PathBuf>> {
        if file.is_dir() {
            std::fs::create_dir_all(&file_path)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // create_new: a file that already exists means two entries collided
        let mut outfile = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)?;
        std::io::copy(&mut file, &mut outfile)?;

        Ok(Some(file_path))
    }

    /// Unzip `archive_path` into `dest_path`
    ///
    /// Every entry must sit under the module's `path@version/` prefix. The prefix is
    /// stripped so `dest_path` receives the module's files directly. Returns the
    /// extracted file paths (directories excluded).
    pub fn unzip(
        archive_path: &Path,
        module: &ModuleVersion,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, %module, ?dest_path, "unzipping module archive");

        std::fs::create_dir_all(dest_path)?;

        let file = std::fs::File::open(archive_path)?;
        let mut archive = ::zip::ZipArchive::new(file)
            .map_err(|e| Self::invalid(archive_path, format!("failed to read archive: {e}")))?;

        let prefix_string = module.archive_prefix();
        let prefix = Path::new(prefix_string.trim_end_matches('/'));
        let mut extracted_files = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(|e| {
                Self::invalid(archive_path, format!("failed to read entry {i}: {e}"))
            })?;

            let Some(file_path) = Self::entry_destination(&file, prefix, dest_path, archive_path)?
            else {
                continue;
            };

            if let Some(path) = Self::extract_entry(file, file_path)? {
                extracted_files.push(path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "module archive extracted"
        );

        Ok(extracted_files)
    }
}
