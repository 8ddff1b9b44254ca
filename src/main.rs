use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sttd", about = "Speech-to-text session daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = sttd_core::DaemonConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("sttd starting");

    let registry = sttd_engine::EngineRegistry::new();
    for descriptor in registry.descriptors() {
        tracing::info!(
            "engine '{}' available ({}, {} language(s))",
            descriptor.id,
            descriptor.display_name,
            descriptor.languages.len(),
        );
    }

    tracing::info!(
        "default engine '{}', default language '{}'",
        config.general.default_engine,
        config.general.default_language,
    );

    let daemon = Arc::new(sttd_daemon::SttDaemon::new(registry, config));

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    tracing::info!("shutting down");
    daemon.shutdown();

    Ok(())
}
