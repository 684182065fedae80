//! modcache-race binary
//!
//! Synthesizes a fixture module archive, then races its extraction against a
//! polling reader for the configured number of trials. Exits non-zero if any
//! trial's writer fails.

use modcache_race::{
    Harness, HarnessConfig, ModuleArchive, ModuleCacheWriter, ModuleVersion, Result,
    open_handles_block_rename,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string(&config) {
        Ok(json) => info!(config = %json, "effective configuration"),
        Err(e) => warn!(error = %e, "failed to serialize configuration"),
    }

    if !open_handles_block_rename() && !config.force {
        info!("open handles do not block renames on this platform, skipping");
        return ExitCode::SUCCESS;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "extraction race failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: HarnessConfig) -> Result<()> {
    let module = ModuleVersion::new(&config.module.path, &config.module.version)?;

    // Lives until the last trial has downloaded from it.
    let fixture_dir = tempfile::Builder::new()
        .prefix("modcache-race-origin-")
        .tempdir()?;
    let fixture_path = fixture_dir.path().to_path_buf();
    let manifest = config.module.manifest.clone();
    let (files, file_size) = (config.module.fixture_files, config.module.fixture_file_size);
    let synth_module = module.clone();
    let source = tokio::task::spawn_blocking(move || {
        ModuleArchive::synthesize(&fixture_path, &synth_module, &manifest, files, file_size)
    })
    .await
    .map_err(|e| modcache_race::Error::TaskFailed(format!("fixture task panicked: {e}")))??;

    let writer = ModuleCacheWriter::new(
        source,
        config.extraction.strategy,
        config.extraction.rename_retry.clone(),
    );
    let trials = config.trials;
    let report = Harness::new(config, Arc::new(writer))?.run_all(trials).await?;

    info!(
        trials = report.trials.len(),
        handles_opened = report.total_handles_opened(),
        "all trials passed"
    );
    fixture_dir.close()?;
    Ok(())
}
