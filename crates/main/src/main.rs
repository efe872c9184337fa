//! 主应用程序入口
//!
//! 加载配置、装配存储与身份适配器，启动 Axum HTTP / WebSocket 服务。

use anyhow::Context;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{cors_from_origins, router_with_cors, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");
    if config.jwt.is_development_secret() {
        tracing::warn!("正在使用内置的开发 JWT 密钥，部署前请设置 APP_JWT__SECRET");
    }

    let infra = Infrastructure::connect(&config)
        .await
        .context("初始化存储失败")?;
    let state = AppState::from_infrastructure(&infra, &config.rooms);
    let app = router_with_cors(state, cors_from_origins(&config.server.cors_origins));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    tracing::info!("房间服务启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
    }
}
