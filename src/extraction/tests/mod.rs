use crate::config::{ExtractStrategy, RetryConfig};
use crate::error::{Error, ExtractionError};
use crate::extraction::*;
use crate::module::{CacheLayout, ModuleVersion};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn module() -> ModuleVersion {
    ModuleVersion::new("example.com/Fixture/mod", "v1.2.3").unwrap()
}

fn fixture(dir: &Path) -> ModuleSource {
    ModuleArchive::synthesize(dir, &module(), "go.mod", 16, 512).unwrap()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Create a ZIP archive from `(name, content)` pairs, names taken verbatim
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

fn relative_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Archive synthesis and unzip
// ---------------------------------------------------------------------------

#[test]
fn test_synthesized_archive_digest_matches_file() {
    let dir = TempDir::new().unwrap();
    let source = fixture(dir.path());

    assert!(source.archive().exists());
    assert!(source.sha256().starts_with("sha256:"));
    assert_eq!(sha256_file(source.archive()).unwrap(), source.sha256());
}

#[test]
fn test_unzip_strips_module_prefix() {
    let dir = TempDir::new().unwrap();
    let source = fixture(dir.path());
    let dest = dir.path().join("out");

    let files = ModuleUnzipper::unzip(source.archive(), &module(), &dest).unwrap();

    assert_eq!(files.len(), 16 + 3);
    assert!(dest.join("go.mod").is_file());
    assert!(dest.join("LICENSE").is_file());
    assert!(dest.join("pkg0").join("file0.go").is_file());
    assert_eq!(
        std::fs::metadata(dest.join("pkg1").join("file1.go")).unwrap().len(),
        512
    );
    let manifest = std::fs::read_to_string(dest.join("go.mod")).unwrap();
    assert!(manifest.starts_with("module example.com/Fixture/mod"));
}

#[test]
fn test_unzip_rejects_entry_outside_prefix() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bad.zip");
    create_zip_archive(
        &archive,
        &[
            ("example.com/Fixture/mod@v1.2.3/go.mod", &b"module x\n"[..]),
            ("stray.txt", &b"nope"[..]),
        ],
    );

    let err = ModuleUnzipper::unzip(&archive, &module(), &dir.path().join("out")).unwrap_err();
    assert!(
        matches!(
            err,
            Error::Extraction(ExtractionError::InvalidArchive { .. })
        ),
        "got {err:?}"
    );
}

#[test]
fn test_unzip_rejects_wrong_version_prefix() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("other.zip");
    create_zip_archive(
        &archive,
        &[("example.com/Fixture/mod@v9.9.9/go.mod", &b"module x\n"[..])],
    );

    assert!(ModuleUnzipper::unzip(&archive, &module(), &dir.path().join("out")).is_err());
}

#[test]
fn test_unzip_rejects_path_traversal() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.zip");
    create_zip_archive(&archive, &[("../../escape.txt", &b"evil"[..])]);

    let err = ModuleUnzipper::unzip(&archive, &module(), &dir.path().join("out")).unwrap_err();
    assert!(matches!(
        err,
        Error::Extraction(ExtractionError::InvalidArchive { .. })
    ));
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_unzip_rejects_non_zip() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("garbage.zip");
    std::fs::write(&archive, b"this is not a zip archive").unwrap();

    let err = ModuleUnzipper::unzip(&archive, &module(), &dir.path().join("out")).unwrap_err();
    assert!(matches!(
        err,
        Error::Extraction(ExtractionError::InvalidArchive { .. })
    ));
}

// ---------------------------------------------------------------------------
// Entry state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_entry_state_probe() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path(), &module());

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Missing);

    std::fs::create_dir_all(layout.entry_dir()).unwrap();
    std::fs::write(layout.partial_marker(), b"").unwrap();
    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Partial);

    std::fs::remove_file(layout.partial_marker()).unwrap();
    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Complete);
}

// ---------------------------------------------------------------------------
// ModuleCacheWriter
// ---------------------------------------------------------------------------

async fn extract_with(strategy: ExtractStrategy) -> (TempDir, ModuleSource, CacheLayout) {
    let dir = TempDir::new().unwrap();
    let source = fixture(&dir.path().join("origin"));
    let cache_root = dir.path().join("gopath0");
    std::fs::create_dir(&cache_root).unwrap();

    let writer = ModuleCacheWriter::new(source.clone(), strategy, fast_retry());
    writer.extract(&cache_root).await.unwrap();

    let layout = CacheLayout::new(&cache_root, &module());
    (dir, source, layout)
}

#[tokio::test]
async fn test_in_place_extraction_completes_without_marker() {
    let (_dir, source, layout) = extract_with(ExtractStrategy::InPlace).await;

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Complete);
    assert!(!layout.partial_marker().exists());
    assert!(layout.entry_dir().join("go.mod").is_file());
    assert_eq!(relative_files(&layout.entry_dir()).len(), 19);

    let recorded = std::fs::read_to_string(layout.download_ziphash()).unwrap();
    assert_eq!(recorded.trim(), source.sha256());
    assert!(layout.download_zip().is_file());
}

#[tokio::test]
async fn test_temp_rename_extraction_leaves_no_staging_dirs() {
    let (_dir, _source, layout) = extract_with(ExtractStrategy::TempRename).await;

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Complete);
    let siblings: Vec<String> = std::fs::read_dir(layout.entry_parent())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(siblings, vec!["mod@v1.2.3".to_string()]);
}

#[tokio::test]
async fn test_strategies_produce_identical_trees() {
    let (_a, _, in_place) = extract_with(ExtractStrategy::InPlace).await;
    let (_b, _, renamed) = extract_with(ExtractStrategy::TempRename).await;

    assert_eq!(
        relative_files(&in_place.entry_dir()),
        relative_files(&renamed.entry_dir())
    );
}

#[tokio::test]
async fn test_second_extract_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let source = fixture(&dir.path().join("origin"));
    let cache_root = dir.path().join("gopath0");
    let writer = ModuleCacheWriter::new(source, ExtractStrategy::InPlace, fast_retry());

    writer.extract(&cache_root).await.unwrap();
    let layout = CacheLayout::new(&cache_root, &module());
    let sentinel = layout.entry_dir().join("untouched");
    std::fs::write(&sentinel, b"keep").unwrap();

    writer.extract(&cache_root).await.unwrap();
    assert!(sentinel.exists(), "complete entry must not be re-extracted");
}

#[tokio::test]
async fn test_in_place_recovers_from_stale_partial_entry() {
    let dir = TempDir::new().unwrap();
    let source = fixture(&dir.path().join("origin"));
    let cache_root = dir.path().join("gopath0");
    let layout = CacheLayout::new(&cache_root, &module());

    // Simulate an interrupted run: marker plus a half-written entry.
    std::fs::create_dir_all(layout.entry_dir()).unwrap();
    std::fs::write(layout.entry_dir().join("go.mod"), b"trunc").unwrap();
    std::fs::write(layout.partial_marker(), b"").unwrap();

    let writer = ModuleCacheWriter::new(source, ExtractStrategy::InPlace, fast_retry());
    writer.extract(&cache_root).await.unwrap();

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Complete);
    let manifest = std::fs::read_to_string(layout.entry_dir().join("go.mod")).unwrap();
    assert!(manifest.starts_with("module "));
}

#[tokio::test]
async fn test_temp_rename_replaces_stale_partial_entry() {
    let dir = TempDir::new().unwrap();
    let source = fixture(&dir.path().join("origin"));
    let cache_root = dir.path().join("gopath0");
    let layout = CacheLayout::new(&cache_root, &module());

    std::fs::create_dir_all(layout.entry_dir()).unwrap();
    std::fs::write(layout.partial_marker(), b"").unwrap();

    let writer = ModuleCacheWriter::new(source, ExtractStrategy::TempRename, fast_retry());
    writer.extract(&cache_root).await.unwrap();

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Complete);
    assert!(layout.entry_dir().join("go.mod").is_file());
}

#[tokio::test]
async fn test_checksum_mismatch_is_fatal() {
    let dir = TempDir::new().unwrap();
    let real = fixture(&dir.path().join("origin"));
    let source = ModuleSource::with_digest(module(), real.archive(), "sha256:00");
    let cache_root = dir.path().join("gopath0");

    let writer = ModuleCacheWriter::new(source, ExtractStrategy::InPlace, fast_retry());
    let err = writer.extract(&cache_root).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Extraction(ExtractionError::ChecksumMismatch { .. })
    ));
    let layout = CacheLayout::new(&cache_root, &module());
    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Missing);
    assert!(!layout.download_zip().exists());
}

#[tokio::test]
async fn test_missing_source_archive_is_download_error() {
    let dir = TempDir::new().unwrap();
    let source = ModuleSource::with_digest(module(), dir.path().join("absent.zip"), "sha256:00");

    let writer = ModuleCacheWriter::new(source, ExtractStrategy::TempRename, fast_retry());
    let err = writer.extract(&dir.path().join("gopath0")).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Extraction(ExtractionError::Download { .. })
    ));
}

#[tokio::test]
async fn test_corrupt_archive_cleans_up_staging_dir() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("corrupt.zip");
    std::fs::write(&archive, b"not a zip").unwrap();
    let source = ModuleSource::from_archive(module(), &archive).unwrap();
    let cache_root = dir.path().join("gopath0");

    let writer = ModuleCacheWriter::new(source, ExtractStrategy::TempRename, fast_retry());
    assert!(writer.extract(&cache_root).await.is_err());

    let layout = CacheLayout::new(&cache_root, &module());
    let leftovers = std::fs::read_dir(layout.entry_parent())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "staging directory must be removed");
}

#[tokio::test]
async fn test_entry_path_that_is_a_file_is_missing() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path(), &module());
    std::fs::create_dir_all(layout.entry_parent()).unwrap();
    std::fs::write(layout.entry_dir(), b"not a directory").unwrap();

    assert_eq!(EntryState::probe(&layout).await.unwrap(), EntryState::Missing);
}

// ---------------------------------------------------------------------------
// Rename into place
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_blocked_rename_reports_both_paths() {
    let dir = TempDir::new().unwrap();
    let from = dir.path().join("mod@v1.2.3.tmp-1");
    let to = dir.path().join("mod@v1.2.3");
    std::fs::create_dir(&from).unwrap();
    std::fs::create_dir(&to).unwrap();
    std::fs::write(to.join("go.mod"), b"module example.com/Fixture/mod").unwrap();

    let err = super::temp_rename::rename_into_place(&from, &to, &fast_retry())
        .await
        .unwrap_err();

    match err {
        Error::Extraction(ExtractionError::Rename {
            from: failed_from,
            to: failed_to,
            ..
        }) => {
            assert_eq!(failed_from, from);
            assert_eq!(failed_to, to);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(from.is_dir(), "staging directory is left for the caller to discard");
    assert!(to.join("go.mod").is_file());
}
