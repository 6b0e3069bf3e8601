//! Skylark Webhook 服务
//!
//! 接收飞书事件回调并回复，提供 /healthz 健康检查。
//! 启动: cargo run --bin skylark [-- path/to/config.toml]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use skylark::app::create_components;
use skylark::config::load_config;
use skylark::core::ShutdownManager;
use skylark::lark::create_router;
use skylark::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    observability::init(&config.app.log_level);
    config.validate().context("Invalid configuration")?;

    let addr = format!("{}:{}", config.app.host, config.app.port);
    let components = create_components(config).context("Failed to create components")?;
    if let Err(e) = components.store.init().await {
        tracing::error!(error = %e, "Store init failed, messages will not be recorded");
    }

    let state = components
        .webhook_state()
        .context("Failed to create webhook state")?;
    let app = create_router(Arc::new(state));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.listen_for_signals();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Skylark listening on http://{}", addr);
    tracing::info!("Webhook URL: http://YOUR_HOST:{}/webhook/lark", components.config.app.port);

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = Arc::clone(&shutdown);
            async move {
                if let Some(reason) = shutdown.wait().await {
                    tracing::info!(reason = %reason, "Draining in-flight requests");
                }
            }
        })
        .await
        .context("Server error")?;

    tracing::info!(
        reason = %shutdown.reason().map(|r| r.to_string()).unwrap_or_default(),
        "Skylark stopped"
    );
    Ok(())
}
