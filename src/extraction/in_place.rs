//! In-place extraction guarded by a `.partial` marker
//!
//! The marker is created before the entry directory and removed only after every
//! file has been written, so an observer that sees the entry directory without the
//! marker sees a complete entry. A marker left behind by an interrupted run causes
//! the stale directory to be discarded and extraction to start over.

use crate::error::{Error, ExtractionError, Result};
use crate::module::CacheLayout;
use std::path::Path;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use super::EntryState;
use super::zip::ModuleUnzipper;

pub(crate) async fn extract(layout: &CacheLayout, zip_path: &Path) -> Result<()> {
    let entry_dir = layout.entry_dir();
    let marker = layout.partial_marker();

    match EntryState::probe(layout).await? {
        EntryState::Complete => {
            debug!(?entry_dir, "entry already extracted");
            return Ok(());
        }
        EntryState::Partial => {
            warn!(?entry_dir, "found incomplete extraction, discarding it");
            match tokio::fs::remove_dir_all(&entry_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        EntryState::Missing => {}
    }

    tokio::fs::create_dir_all(layout.entry_parent()).await?;
    tokio::fs::write(&marker, b"")
        .await
        .map_err(|source| ExtractionError::Marker {
            path: marker.clone(),
            source,
        })?;

    // On failure the marker stays behind; the next attempt sees Partial and starts over.
    let module = layout.module().clone();
    let archive = zip_path.to_path_buf();
    let dest = entry_dir.clone();
    let files = spawn_blocking(move || ModuleUnzipper::unzip(&archive, &module, &dest))
        .await
        .map_err(|e| Error::TaskFailed(format!("extraction task panicked: {e}")))??;

    tokio::fs::remove_file(&marker)
        .await
        .map_err(|source| ExtractionError::Marker {
            path: marker.clone(),
            source,
        })?;

    info!(
        ?entry_dir,
        extracted_count = files.len(),
        "in-place extraction complete"
    );
    Ok(())
}
