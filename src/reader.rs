//! Adversarial cache reader
//!
//! [`CacheEntryReader`] busy-polls a manifest glob beneath a cache root and opens
//! every file it matches, holding the handles until the writer's completion signal
//! closes. Held handles are what make a concurrent rename or removal of their
//! parent directory fail on platforms that pin open files.
//!
//! Listing and opening failures are expected while extraction is in flight. They
//! are counted in [`ReaderStats`] and never surfaced as errors.

use crate::error::{Error, Result};
use crate::module::{CacheLayout, ModuleVersion, is_staging_dir, marker_for};
use crate::signal::CompletionWatcher;
use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Matches `<entry parent>/<entry name>*/<manifest>`
///
/// The trailing `*` makes the glob match staging directories and any other
/// version-suffixed sibling as well as the final entry directory.
#[derive(Debug, Clone)]
pub struct ManifestGlob {
    search_dir: PathBuf,
    matcher: GlobMatcher,
    manifest: String,
}

impl ManifestGlob {
    /// Glob for `module`'s manifest beneath `cache_root`
    pub fn new(cache_root: &Path, module: &ModuleVersion, manifest: &str) -> Result<Self> {
        let layout = CacheLayout::new(cache_root, module);
        let pattern = format!("{}*", layout.entry_name());
        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Other(format!("invalid manifest glob {pattern:?}: {e}")))?
            .compile_matcher();

        Ok(Self {
            search_dir: layout.entry_parent(),
            matcher,
            manifest: manifest.to_string(),
        })
    }

    /// Full pattern, for logging
    pub fn pattern(&self) -> String {
        format!(
            "{}/{}/{}",
            self.search_dir.display(),
            self.matcher.glob(),
            self.manifest
        )
    }

    /// List existing paths matching the glob, sorted
    ///
    /// Any listing failure yields the paths gathered so far; a missing search
    /// directory yields none.
    pub fn matches(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.search_dir) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.matcher.is_match(name) {
                continue;
            }
            let candidate = entry.path().join(&self.manifest);
            if std::fs::symlink_metadata(&candidate).is_ok() {
                found.push(candidate);
            }
        }
        found.sort();
        found
    }
}

/// Open read handles keyed by path; at most one handle per path
#[derive(Debug, Default)]
pub struct OpenHandleSet {
    handles: HashMap<PathBuf, File>,
}

impl OpenHandleSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` already has a handle
    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// Insert a handle for `path` unless one is already held
    ///
    /// Returns `false` and drops `file` if `path` is already present; the original
    /// handle is never replaced.
    pub fn insert(&mut self, path: PathBuf, file: File) -> bool {
        use std::collections::hash_map::Entry;
        match self.handles.entry(path) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(file);
                true
            }
        }
    }

    /// Number of held handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is held
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Paths with a held handle, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.handles.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Close every handle
    pub fn release(self) -> usize {
        let count = self.handles.len();
        drop(self.handles);
        count
    }
}

/// Counters gathered over one reader run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Polling iterations completed before the signal closed
    pub iterations: u64,
    /// Distinct paths opened and held
    pub handles_opened: usize,
    /// Open attempts that failed
    pub transient_errors: u64,
    /// Failed opens on a candidate whose extraction was visibly incomplete
    pub errors_while_incomplete: u64,
    /// Largest number of paths matched by a single listing
    pub max_matches: usize,
}

/// Open `path` for reading without allowing it to be deleted or renamed underneath
#[cfg(windows)]
pub fn open_for_read(path: &Path) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_SHARE_READ: u32 = 0x0000_0001;
    std::fs::OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_READ)
        .open(path)
}

/// Open `path` for reading
#[cfg(not(windows))]
pub fn open_for_read(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

/// Repeatedly globs and opens manifests until told to stop
#[derive(Debug, Clone)]
pub struct CacheEntryReader {
    glob: ManifestGlob,
    poll_interval: Option<Duration>,
}

impl CacheEntryReader {
    /// Reader over `glob`; `poll_interval` of `None` busy-polls
    pub fn new(glob: ManifestGlob, poll_interval: Option<Duration>) -> Self {
        Self {
            glob,
            poll_interval,
        }
    }

    /// Poll until `watcher` reports the writer finished, then release all handles
    ///
    /// Blocking; run it on a blocking thread. The signal is checked once per
    /// iteration before listing, so the loop ends within one iteration of the close.
    pub fn poll_until_signaled(&self, watcher: &CompletionWatcher) -> ReaderStats {
        let mut handles = OpenHandleSet::new();
        let mut stats = ReaderStats::default();

        debug!(pattern = %self.glob.pattern(), "reader polling");

        while !watcher.is_closed() {
            stats.iterations += 1;

            let matches = self.glob.matches();
            stats.max_matches = stats.max_matches.max(matches.len());

            for path in matches {
                if handles.contains(&path) {
                    continue;
                }
                match open_for_read(&path) {
                    Ok(file) => {
                        trace!(?path, "opened manifest");
                        let inserted = handles.insert(path, file);
                        debug_assert!(inserted, "manifest opened twice");
                    }
                    Err(e) => {
                        stats.transient_errors += 1;
                        if extraction_incomplete(&path) {
                            stats.errors_while_incomplete += 1;
                        }
                        trace!(?path, error = %e, "manifest not readable yet");
                    }
                }
            }

            match self.poll_interval {
                Some(interval) => std::thread::sleep(interval),
                None => std::thread::yield_now(),
            }
        }

        stats.handles_opened = handles.len();
        let released = handles.release();
        debug!(
            iterations = stats.iterations,
            released,
            transient_errors = stats.transient_errors,
            "reader drained"
        );
        stats
    }
}

fn extraction_incomplete(manifest: &Path) -> bool {
    manifest
        .parent()
        .is_some_and(|dir| is_staging_dir(dir) || marker_for(dir).exists())
}
