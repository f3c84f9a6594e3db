use anyhow::{Context, Result};
use dhctl_registry::{config::RegistryConfig, logging, render, runtime};

fn main() -> Result<()> {
    let config = RegistryConfig::new().context("parsing config")?;

    logging::init(config.log_level).context("initializing logging")?;

    runtime::prepare_tokio_runtime(config.threads)?.block_on(async {
        let summary = render::run(&config).await?;

        log::info!(
            "registry mode {} rendered, {} objects, {} files written",
            summary.mode,
            summary.artifacts.len(),
            summary.written_files.len()
        );

        anyhow::Ok(())
    })
}
