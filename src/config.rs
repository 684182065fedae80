//! Configuration types for modcache-race

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opt-in toggle for the in-place extraction strategy
pub const ENV_UNZIP_IN_PLACE: &str = "MODCACHE_UNZIP_IN_PLACE";
/// Number of trials to run
pub const ENV_TRIALS: &str = "MODCACHE_TRIALS";
/// Reader poll interval in milliseconds (unset = busy poll)
pub const ENV_POLL_INTERVAL_MS: &str = "MODCACHE_POLL_INTERVAL_MS";
/// Run even where open handles do not block directory renames
pub const ENV_FORCE: &str = "MODCACHE_FORCE";

/// How the cache writer publishes a partially extracted entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStrategy {
    /// Unzip into a randomly named sibling directory, then rename it into place
    #[default]
    TempRename,
    /// Unzip directly into the entry directory guarded by a `.partial` marker file
    InPlace,
}

impl std::fmt::Display for ExtractStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractStrategy::TempRename => write!(f, "temp_rename"),
            ExtractStrategy::InPlace => write!(f, "in_place"),
        }
    }
}

/// Identity and shape of the module extracted on every trial
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module path (default: "example.com/Fixture/modcache")
    #[serde(default = "default_module_path")]
    pub path: String,

    /// Module version (default: "v1.4.2")
    #[serde(default = "default_module_version")]
    pub version: String,

    /// File the reader globs for inside the entry directory (default: "go.mod")
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Number of source files in the synthesized fixture archive (default: 64)
    #[serde(default = "default_fixture_files")]
    pub fixture_files: usize,

    /// Size in bytes of each synthesized source file (default: 8192)
    #[serde(default = "default_fixture_file_size")]
    pub fixture_file_size: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            path: default_module_path(),
            version: default_module_version(),
            manifest: default_manifest(),
            fixture_files: default_fixture_files(),
            fixture_file_size: default_fixture_file_size(),
        }
    }
}

/// Retry behavior for filesystem operations that can fail while a reader holds handles
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 10 milliseconds)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 500 milliseconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Writer-side settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Extraction strategy under test
    #[serde(default)]
    pub strategy: ExtractStrategy,

    /// Retry policy for renaming the staging directory into place
    #[serde(default)]
    pub rename_retry: RetryConfig,
}

/// Reader-side settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Delay between polls in milliseconds; `None` busy-polls
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl ReaderConfig {
    /// Poll interval as a [`Duration`], if one is configured
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

/// Top-level harness configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Number of sequential trials (default: 10)
    #[serde(default = "default_trials")]
    pub trials: usize,

    /// Run on platforms where the race cannot reproduce (default: false)
    #[serde(default)]
    pub force: bool,

    /// Module under extraction
    #[serde(default)]
    pub module: ModuleConfig,

    /// Writer settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Reader settings
    #[serde(default)]
    pub reader: ReaderConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            force: false,
            module: ModuleConfig::default(),
            extraction: ExtractionConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Build a configuration from defaults overlaid with the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overlaid with values returned by `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_UNZIP_IN_PLACE) {
            config.extraction.strategy = if parse_flag(ENV_UNZIP_IN_PLACE, &raw)? {
                ExtractStrategy::InPlace
            } else {
                ExtractStrategy::TempRename
            };
        }

        if let Some(raw) = lookup(ENV_TRIALS) {
            let trials: usize = raw.trim().parse().map_err(|_| {
                Error::config(ENV_TRIALS, format!("expected a trial count, got {raw:?}"))
            })?;
            if trials == 0 {
                return Err(Error::config(ENV_TRIALS, "trial count must be at least 1"));
            }
            config.trials = trials;
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::config(
                    ENV_POLL_INTERVAL_MS,
                    format!("expected milliseconds, got {raw:?}"),
                )
            })?;
            config.reader.poll_interval_ms = Some(millis);
        }

        if let Some(raw) = lookup(ENV_FORCE) {
            config.force = parse_flag(ENV_FORCE, &raw)?;
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::config(
            key,
            format!("expected a boolean flag, got {raw:?}"),
        )),
    }
}

fn default_trials() -> usize {
    10
}

fn default_module_path() -> String {
    "example.com/Fixture/modcache".to_string()
}

fn default_module_version() -> String {
    "v1.4.2".to_string()
}

fn default_manifest() -> String {
    "go.mod".to_string()
}

fn default_fixture_files() -> usize {
    64
}

fn default_fixture_file_size() -> usize {
    8 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_max_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
