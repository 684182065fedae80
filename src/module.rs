//! Module identities and the on-disk layout of a module cache root
//!
//! A cache root mirrors the layout a package manager uses for its module cache:
//!
//! ```text
//! <cache_root>/pkg/mod/<escaped path>@<escaped version>/          extracted entry
//! <cache_root>/pkg/mod/<escaped path>@<escaped version>.partial   in-place marker
//! <cache_root>/pkg/mod/cache/download/<escaped path>/@v/<v>.zip   downloaded archive
//! <cache_root>/pkg/mod/cache/download/<escaped path>/@v/<v>.ziphash
//! ```
//!
//! Uppercase letters are escaped as `!` followed by the lowercase letter so that
//! case-insensitive filesystems never fold two distinct modules together.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix of the marker file present while an in-place extraction is incomplete
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Infix of staging directories used by the temp-and-rename strategy
pub const TEMP_DIR_INFIX: &str = ".tmp-";

/// A validated `path@version` module identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleVersion {
    path: String,
    version: String,
}

impl ModuleVersion {
    /// Validate and build a module identity
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let version = version.into();
        let module = format!("{path}@{version}");

        check_path(&path).map_err(|reason| Error::InvalidModule {
            module: module.clone(),
            reason,
        })?;
        check_version(&version).map_err(|reason| Error::InvalidModule { module, reason })?;

        Ok(Self { path, version })
    }

    /// Module path as given (unescaped)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Module version as given (unescaped)
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Module path with uppercase letters escaped
    pub fn escaped_path(&self) -> String {
        escape_case(&self.path)
    }

    /// Module version with uppercase letters escaped
    pub fn escaped_version(&self) -> String {
        escape_case(&self.version)
    }

    /// Prefix every entry of this module's zip archive must carry (`path@version/`)
    pub fn archive_prefix(&self) -> String {
        format!("{}@{}/", self.path, self.version)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// Escape uppercase ASCII letters as `!` + lowercase
pub fn escape_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn check_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("empty module path".to_string());
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err("leading or trailing slash".to_string());
    }
    if path.contains("//") {
        return Err("double slash".to_string());
    }
    for elem in path.split('/') {
        if elem == "." || elem == ".." {
            return Err(format!("invalid path element {elem:?}"));
        }
        if elem.starts_with('.') || elem.ends_with('.') {
            return Err(format!("path element {elem:?} starts or ends with a dot"));
        }
    }
    if let Some(bad) = path.chars().find(|c| !is_path_char(*c)) {
        return Err(format!("invalid character {bad:?}"));
    }
    Ok(())
}

fn check_version(version: &str) -> std::result::Result<(), String> {
    if !version.starts_with('v') || version.len() < 2 {
        return Err(format!("version {version:?} must start with 'v'"));
    }
    if let Some(bad) = version
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+')))
    {
        return Err(format!("invalid character {bad:?} in version"));
    }
    Ok(())
}

// Letters, digits and `-._~` plus the separator. Everything else, including glob
// metacharacters and `!`, is rejected.
fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '/')
}

/// Paths of one module's artifacts under a single cache root
#[derive(Clone, Debug)]
pub struct CacheLayout {
    mod_root: PathBuf,
    module: ModuleVersion,
}

impl CacheLayout {
    /// Layout of `module` inside `cache_root`
    pub fn new(cache_root: &Path, module: &ModuleVersion) -> Self {
        Self {
            mod_root: cache_root.join("pkg").join("mod"),
            module: module.clone(),
        }
    }

    /// The module identity this layout describes
    pub fn module(&self) -> &ModuleVersion {
        &self.module
    }

    /// Final extracted entry directory
    pub fn entry_dir(&self) -> PathBuf {
        self.mod_root.join(format!(
            "{}@{}",
            self.module.escaped_path(),
            self.module.escaped_version()
        ))
    }

    /// Directory holding the entry directory and its siblings
    pub fn entry_parent(&self) -> PathBuf {
        let entry = self.entry_dir();
        entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.mod_root.clone())
    }

    /// File name of the entry directory (`<last element>@<version>`)
    pub fn entry_name(&self) -> String {
        let escaped = self.module.escaped_path();
        let last = escaped.rsplit('/').next().unwrap_or(&escaped);
        format!("{}@{}", last, self.module.escaped_version())
    }

    /// Marker present while an in-place extraction is incomplete
    pub fn partial_marker(&self) -> PathBuf {
        marker_for(&self.entry_dir())
    }

    /// Directory of downloaded archives for this module
    pub fn download_dir(&self) -> PathBuf {
        self.mod_root
            .join("cache")
            .join("download")
            .join(self.module.escaped_path())
            .join("@v")
    }

    /// Downloaded module archive
    pub fn download_zip(&self) -> PathBuf {
        self.download_dir()
            .join(format!("{}.zip", self.module.escaped_version()))
    }

    /// Recorded digest of the downloaded archive
    pub fn download_ziphash(&self) -> PathBuf {
        self.download_dir()
            .join(format!("{}.ziphash", self.module.escaped_version()))
    }
}

/// `.partial` marker path for an entry directory
pub fn marker_for(entry_dir: &Path) -> PathBuf {
    let mut name = entry_dir.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Whether `dir` is a staging directory of the temp-and-rename strategy
pub fn is_staging_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(TEMP_DIR_INFIX))
}
