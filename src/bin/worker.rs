//! Skylark 摘要 Worker
//!
//! 独立于 Web 进程运行，按计划推送每日群聊摘要。
//! 启动: cargo run --bin skylark-worker [-- path/to/config.toml]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use skylark::app::create_components;
use skylark::config::load_config;
use skylark::core::ShutdownManager;
use skylark::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    observability::init(&config.app.log_level);
    config.validate().context("Invalid configuration")?;

    let components = create_components(config).context("Failed to create components")?;
    let worker = components
        .summary_worker()
        .context("Failed to create summary worker")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.listen_for_signals();

    worker.run(shutdown.token()).await;
    match shutdown.reason() {
        Some(reason) => tracing::info!(reason = %reason, "Summary worker exited"),
        None => tracing::warn!("Summary worker exited without a shutdown signal"),
    }
    Ok(())
}
