//! Trial orchestration
//!
//! [`Harness::run_all`] runs trials one after another. Each trial gets a fresh cache
//! root below a session-wide temporary directory, spawns the cache writer as a
//! background task and runs the reader on a blocking thread until the writer's
//! completion signal closes. The first writer error ends the run.
//!
//! # Example
//!
//! ```no_run
//! use modcache_race::config::HarnessConfig;
//! use modcache_race::extraction::{CacheEntryWriter, ModuleCacheWriter, ModuleSource};
//! use modcache_race::harness::Harness;
//! use std::sync::Arc;
//!
//! # async fn example(source: ModuleSource) -> modcache_race::error::Result<()> {
//! let config = HarnessConfig::default();
//! let writer: Arc<dyn CacheEntryWriter> = Arc::new(ModuleCacheWriter::new(
//!     source,
//!     config.extraction.strategy,
//!     config.extraction.rename_retry.clone(),
//! ));
//! let harness = Harness::new(config, writer)?;
//! let report = harness.run_all(10).await?;
//! println!("{} trials passed", report.trials.len());
//! # Ok(())
//! # }
//! ```

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::extraction::CacheEntryWriter;
use crate::module::ModuleVersion;
use crate::reader::{CacheEntryReader, ManifestGlob, ReaderStats};
use crate::signal::completion_channel;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};

/// Session-wide temporary root holding every trial's cache root
///
/// Removed when closed or dropped, so every exit path releases it. Trial roots are
/// not removed individually to avoid racing cleanup against straggling handles.
#[derive(Debug)]
pub struct SessionRoot {
    dir: TempDir,
}

impl SessionRoot {
    /// Create a fresh session root in the system temp directory
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("modcache-race-").tempdir()?;
        debug!(path = ?dir.path(), "created session root");
        Ok(Self { dir })
    }

    /// Create a fresh session root inside `parent`
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("modcache-race-")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    /// Path of the session root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Cache root for trial `index`: `<session>/gopath<index>`
    pub fn trial_root(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("gopath{index}"))
    }

    /// Create the cache root for trial `index`, failing if it already exists
    pub fn new_trial(&self, index: usize) -> Result<Trial> {
        let cache_root = self.trial_root(index);
        std::fs::create_dir(&cache_root)?;
        Ok(Trial { index, cache_root })
    }

    /// Remove the session root, reporting removal failures
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(?path, "removed session root");
        Ok(())
    }
}

/// One isolated writer/reader race
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    /// Ordinal of the trial within the run
    pub index: usize,
    /// Cache root used exclusively by this trial
    pub cache_root: PathBuf,
}

/// Outcome of one successful trial
#[derive(Debug, Clone)]
pub struct TrialReport {
    /// Ordinal of the trial
    pub index: usize,
    /// Cache root the trial used
    pub cache_root: PathBuf,
    /// What the reader observed
    pub reader: ReaderStats,
    /// Wall time from writer spawn to writer join
    pub elapsed: Duration,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default)]
pub struct HarnessReport {
    /// Per-trial reports in order
    pub trials: Vec<TrialReport>,
}

impl HarnessReport {
    /// Sum of handles held across trials
    pub fn total_handles_opened(&self) -> usize {
        self.trials.iter().map(|t| t.reader.handles_opened).sum()
    }

    /// Sum of swallowed reader open failures across trials
    pub fn total_transient_errors(&self) -> u64 {
        self.trials.iter().map(|t| t.reader.transient_errors).sum()
    }
}

/// Runs writer/reader trials against fresh cache roots
pub struct Harness {
    config: HarnessConfig,
    module: ModuleVersion,
    writer: Arc<dyn CacheEntryWriter>,
}

impl Harness {
    /// Build a harness; fails if the configured module identity is invalid
    pub fn new(config: HarnessConfig, writer: Arc<dyn CacheEntryWriter>) -> Result<Self> {
        let module = ModuleVersion::new(&config.module.path, &config.module.version)?;
        Ok(Self {
            config,
            module,
            writer,
        })
    }

    /// Run `trial_count` trials in a fresh session root
    ///
    /// Returns the first writer error unchanged; trials after a failing one never
    /// start. The session root is removed on every exit path.
    pub async fn run_all(&self, trial_count: usize) -> Result<HarnessReport> {
        let session = SessionRoot::create()?;
        let result = self.run_in(&session, trial_count).await;

        if let Err(e) = session.close() {
            warn!(error = %e, "failed to remove session root");
        }
        result
    }

    /// Run `trial_count` trials under an existing session root
    pub async fn run_in(&self, session: &SessionRoot, trial_count: usize) -> Result<HarnessReport> {
        info!(
            trials = trial_count,
            module = %self.module,
            strategy = %self.config.extraction.strategy,
            session = ?session.path(),
            "starting extraction race"
        );

        let mut report = HarnessReport::default();
        for index in 0..trial_count {
            let trial = session.new_trial(index)?;
            match self.run_trial(&trial).await {
                Ok(trial_report) => report.trials.push(trial_report),
                Err(e) => {
                    error!(
                        trial = index,
                        cache_root = ?trial.cache_root,
                        error = %e,
                        "cache writer failed, aborting run"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            trials = report.trials.len(),
            handles_opened = report.total_handles_opened(),
            transient_errors = report.total_transient_errors(),
            "extraction race passed"
        );
        Ok(report)
    }

    /// Race one writer against one reader on `trial.cache_root`
    pub async fn run_trial(&self, trial: &Trial) -> Result<TrialReport> {
        let started = Instant::now();
        let glob = ManifestGlob::new(&trial.cache_root, &self.module, &self.config.module.manifest)?;
        let reader = CacheEntryReader::new(glob, self.config.reader.poll_interval());
        let (signal, watcher) = completion_channel();

        let writer = Arc::clone(&self.writer);
        let cache_root = trial.cache_root.clone();
        let writer_task = tokio::spawn(async move {
            let result = writer.extract(&cache_root).await;
            signal.close();
            result
        });

        let reader_result = spawn_blocking(move || reader.poll_until_signaled(&watcher)).await;

        // The reader only returns after the signal closed, so the writer has finished.
        let writer_result = writer_task
            .await
            .map_err(|e| Error::TaskFailed(format!("writer task failed: {e}")))?;
        writer_result?;

        let stats =
            reader_result.map_err(|e| Error::TaskFailed(format!("reader task failed: {e}")))?;

        debug!(
            trial = trial.index,
            iterations = stats.iterations,
            handles_opened = stats.handles_opened,
            transient_errors = stats.transient_errors,
            errors_while_incomplete = stats.errors_while_incomplete,
            max_matches = stats.max_matches,
            "trial passed"
        );

        Ok(TrialReport {
            index: trial.index,
            cache_root: trial.cache_root.clone(),
            reader: stats,
            elapsed: started.elapsed(),
        })
    }
}
