//! # modcache-race
//!
//! Regression harness that races a module-cache extraction routine against a reader
//! opening files inside the destination while extraction is still in progress.
//!
//! ## How a run works
//!
//! - A session-wide temporary root is created once and holds one cache root per trial
//! - Per trial, a [`CacheEntryWriter`] downloads and extracts a fixed module version
//!   in a background task
//! - Concurrently, a [`CacheEntryReader`] globs for the module's manifest and opens
//!   every match, holding the handles until the writer signals completion
//! - Any writer error fails the whole run; reader failures are expected and ignored
//!
//! The race only reproduces where open file handles block renaming or deleting
//! their parent directory; see [`open_handles_block_rename`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use modcache_race::{HarnessConfig, Harness, ModuleArchive, ModuleCacheWriter, ModuleVersion};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarnessConfig::from_env()?;
//!     let module = ModuleVersion::new(&config.module.path, &config.module.version)?;
//!     let fixture = tempfile::tempdir()?;
//!     let source = ModuleArchive::synthesize(fixture.path(), &module, "go.mod", 64, 8192)?;
//!
//!     let writer = ModuleCacheWriter::new(
//!         source,
//!         config.extraction.strategy,
//!         config.extraction.rename_retry.clone(),
//!     );
//!     let trials = config.trials;
//!     let report = Harness::new(config, Arc::new(writer))?.run_all(trials).await?;
//!     println!("{} trials passed", report.trials.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Module cache population
pub mod extraction;
/// Trial orchestration
pub mod harness;
/// Module identities and cache layout
pub mod module;
/// Adversarial cache reader
pub mod reader;
/// Retry logic with exponential backoff
pub mod retry;
/// One-shot completion signal
pub mod signal;

// Re-export commonly used types
pub use config::{ExtractStrategy, HarnessConfig};
pub use error::{Error, ExtractionError, Result};
pub use extraction::{CacheEntryWriter, EntryState, ModuleArchive, ModuleCacheWriter, ModuleSource};
pub use harness::{Harness, HarnessReport, SessionRoot, Trial, TrialReport};
pub use module::{CacheLayout, ModuleVersion};
pub use reader::{CacheEntryReader, ManifestGlob, OpenHandleSet, ReaderStats};
pub use signal::{CompletionSignal, CompletionWatcher, completion_channel};

/// Whether open file handles block renaming or deleting their parent directory
///
/// Only on such platforms can the reader make a rename-based extraction fail, so
/// only there does a passing run say anything about the extraction routine.
pub fn open_handles_block_rename() -> bool {
    cfg!(windows)
}
