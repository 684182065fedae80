//! Copy a module archive into the download area of a cache root

use crate::error::{Error, ExtractionError, Result};
use crate::module::{CacheLayout, TEMP_DIR_INFIX};
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use super::archive::{ModuleSource, sha256_file};

/// Ensure `<download_dir>/<version>.zip` and its `.ziphash` exist and match `source`
///
/// An archive already present with a matching recorded digest is reused. Files are
/// written under a temporary name and renamed into place so a concurrent observer
/// never sees a truncated archive.
pub(crate) async fn download(layout: &CacheLayout, source: &ModuleSource) -> Result<PathBuf> {
    let module = layout.module().to_string();
    let zip_path = layout.download_zip();
    let ziphash_path = layout.download_ziphash();

    if let Ok(recorded) = tokio::fs::read_to_string(&ziphash_path).await
        && recorded.trim() == source.sha256()
        && tokio::fs::metadata(&zip_path).await.is_ok()
    {
        debug!(%module, ?zip_path, "module archive already downloaded");
        return Ok(zip_path);
    }

    tokio::fs::create_dir_all(layout.download_dir())
        .await
        .map_err(|e| ExtractionError::Download {
            module: module.clone(),
            reason: format!("failed to create download directory: {e}"),
        })?;

    let staging = staging_name(&zip_path);
    tokio::fs::copy(source.archive(), &staging)
        .await
        .map_err(|e| ExtractionError::Download {
            module: module.clone(),
            reason: format!("failed to copy {}: {e}", source.archive().display()),
        })?;

    let staging_owned = staging.clone();
    let actual = spawn_blocking(move || sha256_file(&staging_owned))
        .await
        .map_err(|e| Error::TaskFailed(format!("hashing task panicked: {e}")))??;

    if actual != source.sha256() {
        remove_quietly(&staging).await;
        return Err(ExtractionError::ChecksumMismatch {
            module,
            expected: source.sha256().to_string(),
            actual,
        }
        .into());
    }

    if let Err(e) = tokio::fs::rename(&staging, &zip_path).await {
        remove_quietly(&staging).await;
        return Err(ExtractionError::Download {
            module,
            reason: format!("failed to move archive into place: {e}"),
        }
        .into());
    }

    let hash_staging = staging_name(&ziphash_path);
    tokio::fs::write(&hash_staging, format!("{actual}\n")).await?;
    tokio::fs::rename(&hash_staging, &ziphash_path).await?;

    debug!(%module, ?zip_path, digest = %actual, "module archive downloaded");
    Ok(zip_path)
}

fn staging_name(path: &Path) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("{TEMP_DIR_INFIX}{suffix}"));
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(?path, error = %e, "failed to remove staging file");
    }
}
