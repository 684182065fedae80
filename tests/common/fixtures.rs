//! Fixture archives and harness builders shared by integration tests

use modcache_race::{
    ExtractStrategy, Harness, HarnessConfig, ModuleArchive, ModuleCacheWriter, ModuleSource,
    ModuleVersion,
};
use std::sync::Arc;
use tempfile::TempDir;

/// A synthesized module archive kept alive for the duration of a test
pub struct Fixture {
    pub dir: TempDir,
    pub source: ModuleSource,
    pub config: HarnessConfig,
}

/// Build a fixture archive for the default module with `files` source files
pub fn fixture(strategy: ExtractStrategy, files: usize) -> Fixture {
    let mut config = HarnessConfig::default();
    config.extraction.strategy = strategy;
    config.module.fixture_files = files;
    config.module.fixture_file_size = 2048;

    let module = ModuleVersion::new(&config.module.path, &config.module.version)
        .expect("default module is valid");
    let dir = TempDir::new().expect("create fixture dir");
    let source = ModuleArchive::synthesize(
        dir.path(),
        &module,
        &config.module.manifest,
        config.module.fixture_files,
        config.module.fixture_file_size,
    )
    .expect("synthesize fixture archive");

    Fixture {
        dir,
        source,
        config,
    }
}

impl Fixture {
    /// Harness wired to a real [`ModuleCacheWriter`] over this fixture
    pub fn harness(&self) -> Harness {
        let writer = ModuleCacheWriter::new(
            self.source.clone(),
            self.config.extraction.strategy,
            self.config.extraction.rename_retry.clone(),
        );
        Harness::new(self.config.clone(), Arc::new(writer)).expect("valid harness config")
    }
}
