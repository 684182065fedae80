//! Populating a module cache entry
//!
//! This module downloads a module archive into a cache root and extracts it into the
//! entry directory using one of two strategies:
//! - temp-and-rename: unzip into a staging sibling, then rename it into place
//! - in-place: unzip directly into the entry directory while a `.partial` marker exists
//!
//! The harness drives extraction through the [`CacheEntryWriter`] trait so test
//! doubles can stand in for [`ModuleCacheWriter`].

mod archive;
mod download;
mod in_place;
mod temp_rename;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use archive::{ModuleArchive, ModuleSource, sha256_file};
pub use self::zip::ModuleUnzipper;

use crate::config::{ExtractStrategy, RetryConfig};
use crate::error::Result;
use crate::module::CacheLayout;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Something that populates one cache entry inside a cache root
///
/// Implementations must report failure through the returned error and never abort
/// the process. They are invoked once per trial with an isolated `cache_root`.
///
/// # Examples
///
/// ```no_run
/// use modcache_race::extraction::{CacheEntryWriter, ModuleCacheWriter, ModuleSource};
/// use modcache_race::config::{ExtractStrategy, RetryConfig};
/// use std::path::Path;
///
/// # async fn example(source: ModuleSource) -> modcache_race::error::Result<()> {
/// let writer = ModuleCacheWriter::new(source, ExtractStrategy::InPlace, RetryConfig::default());
/// writer.extract(Path::new("/tmp/gopath0")).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CacheEntryWriter: Send + Sync {
    /// Download and extract the module into `cache_root`
    async fn extract(&self, cache_root: &Path) -> Result<()>;
}

/// Observable state of a cache entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Neither the entry directory nor its marker exists
    Missing,
    /// The `.partial` marker exists; the entry must not be trusted
    Partial,
    /// The entry directory exists without a marker
    Complete,
}

impl EntryState {
    /// Inspect the entry described by `layout`
    ///
    /// A non-directory at the entry path counts as missing.
    pub async fn probe(layout: &CacheLayout) -> Result<Self> {
        if tokio::fs::try_exists(layout.partial_marker()).await? {
            return Ok(EntryState::Partial);
        }
        match tokio::fs::metadata(layout.entry_dir()).await {
            Ok(meta) if meta.is_dir() => Ok(EntryState::Complete),
            Ok(_) => Ok(EntryState::Missing),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryState::Missing),
            Err(e) => Err(e.into()),
        }
    }
}

/// Production cache writer: download from a local [`ModuleSource`], then extract
#[derive(Debug, Clone)]
pub struct ModuleCacheWriter {
    source: ModuleSource,
    strategy: ExtractStrategy,
    rename_retry: RetryConfig,
}

impl ModuleCacheWriter {
    /// Create a writer for `source` using `strategy`
    pub fn new(source: ModuleSource, strategy: ExtractStrategy, rename_retry: RetryConfig) -> Self {
        Self {
            source,
            strategy,
            rename_retry,
        }
    }
}

#[async_trait]
impl CacheEntryWriter for ModuleCacheWriter {
    async fn extract(&self, cache_root: &Path) -> Result<()> {
        let layout = CacheLayout::new(cache_root, self.source.module());

        debug!(
            module = %self.source.module(),
            ?cache_root,
            strategy = %self.strategy,
            "populating cache entry"
        );

        let zip_path = download::download(&layout, &self.source).await?;

        match self.strategy {
            ExtractStrategy::TempRename => {
                temp_rename::extract(&layout, &zip_path, &self.rename_retry).await?
            }
            ExtractStrategy::InPlace => in_place::extract(&layout, &zip_path).await?,
        }

        info!(
            module = %self.source.module(),
            entry = ?layout.entry_dir(),
            strategy = %self.strategy,
            "cache entry complete"
        );
        Ok(())
    }
}
