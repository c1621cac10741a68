use axum::{routing::get, Json};
use qbrdt_rust::{
    config::AppConfig,
    logging,
    monitor::MonitorConfig,
    server::{build_router, AppState},
    DownloadEngine, RealDebridClient, RepositoryHooks, SqliteRepository, TorrentMonitor,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// 健康检查
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置，环境变量优先
    let config_path = AppConfig::config_path();
    let mut config = AppConfig::load_or_default(&config_path).await;
    config.apply_env_overrides();
    config.validate()?;

    // 🔥 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);
    info!("qbrdt v{} 启动中...", env!("CARGO_PKG_VERSION"));
    info!("配置文件: {}", config_path);

    // 仓库
    let repo = Arc::new(SqliteRepository::open(&config.database.path)?);

    // debrid 客户端
    let debrid = Arc::new(RealDebridClient::new(&config.realdebrid)?);

    // 下载引擎，回调写回仓库
    let hooks = Arc::new(RepositoryHooks::new(repo.clone()));
    let engine = Arc::new(DownloadEngine::new(&config.downloader, hooks)?);

    // 同步服务
    let monitor = Arc::new(TorrentMonitor::new(
        repo.clone(),
        debrid.clone(),
        engine.clone(),
        MonitorConfig::from(&config),
    ));
    monitor.run_startup_recovery()?;

    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.start().await })
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(repo, debrid, engine.clone(), config);
    let app = build_router(state).route("/health", get(health_check));

    // 启动服务器
    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v2", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // 🔥 使用 select! 监听关闭信号，支持优雅关闭
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    // 🔥 优雅关闭：先停同步服务，再取消下载，等待槽位的提交会立即返回
    info!("正在停止同步服务...");
    monitor.stop();

    info!("正在取消进行中的下载...");
    engine.cancel_all();

    if let Err(e) = monitor_task.await {
        tracing::error!("同步服务退出异常: {}", e);
    }
    info!("应用已安全退出");

    Ok(())
}
