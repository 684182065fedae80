//! Temp-and-rename extraction
//!
//! Files are unzipped into `<entry>.tmp-<random>` beside the entry directory and the
//! staging directory is renamed into place once complete. On platforms where open
//! file handles pin their parent directory, a reader holding a file inside the
//! staging directory makes the rename fail; transient failures are retried with
//! backoff before giving up.

use crate::config::RetryConfig;
use crate::error::{Error, ExtractionError, Result};
use crate::module::{CacheLayout, TEMP_DIR_INFIX};
use crate::retry::with_retry;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use super::EntryState;
use super::zip::ModuleUnzipper;

pub(crate) async fn extract(
    layout: &CacheLayout,
    zip_path: &Path,
    retry: &RetryConfig,
) -> Result<()> {
    let entry_dir = layout.entry_dir();

    match EntryState::probe(layout).await? {
        EntryState::Complete => {
            debug!(?entry_dir, "entry already extracted");
            return Ok(());
        }
        EntryState::Partial => {
            warn!(?entry_dir, "found incomplete in-place extraction, discarding it");
            match tokio::fs::remove_dir_all(&entry_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::remove_file(layout.partial_marker())
                .await
                .map_err(|source| ExtractionError::Marker {
                    path: layout.partial_marker(),
                    source,
                })?;
        }
        EntryState::Missing => {}
    }

    let parent = layout.entry_parent();
    tokio::fs::create_dir_all(&parent).await?;
    let staging = staging_dir(&parent, &layout.entry_name());

    let module = layout.module().clone();
    let archive = zip_path.to_path_buf();
    let dest = staging.clone();
    let unzipped = spawn_blocking(move || ModuleUnzipper::unzip(&archive, &module, &dest))
        .await
        .map_err(|e| Error::TaskFailed(format!("extraction task panicked: {e}")))
        .and_then(|result| result);

    let files = match unzipped {
        Ok(files) => files,
        Err(e) => {
            discard_staging(&staging).await;
            return Err(e);
        }
    };

    if let Err(e) = rename_into_place(&staging, &entry_dir, retry).await {
        discard_staging(&staging).await;
        return Err(e);
    }

    info!(
        ?entry_dir,
        extracted_count = files.len(),
        "staged extraction renamed into place"
    );
    Ok(())
}

/// Rename `from` onto `to`, retrying while an open handle below `from` blocks it
pub(super) async fn rename_into_place(from: &Path, to: &Path, retry: &RetryConfig) -> Result<()> {
    with_retry(retry, || async move {
        tokio::fs::rename(from, to).await.map_err(|source| {
            warn!(?from, ?to, error = %source, "rename into place failed");
            Error::from(ExtractionError::Rename {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })
        })
    })
    .await
}

fn staging_dir(parent: &Path, entry_name: &str) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
    parent.join(format!("{entry_name}{TEMP_DIR_INFIX}{suffix}"))
}

async fn discard_staging(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(?staging, error = %e, "failed to remove staging directory");
    }
}
