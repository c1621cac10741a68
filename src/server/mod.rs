// Web服务器模块
//
// 兼容 qBittorrent WebUI API v2 的子集，供 Sonarr / Radarr 等客户端使用

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// 构建 /api/v2 路由
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // 认证
        .route(
            "/auth/login",
            get(handlers::login_query).post(handlers::login_form),
        )
        // 应用信息
        .route("/app/version", get(handlers::app_version).post(handlers::app_version))
        .route(
            "/app/webapiVersion",
            get(handlers::webapi_version).post(handlers::webapi_version),
        )
        .route(
            "/app/preferences",
            get(handlers::preferences).post(handlers::preferences),
        )
        // 种子
        .route(
            "/torrents/info",
            get(handlers::torrents_info_query).post(handlers::torrents_info_form),
        )
        .route(
            "/torrents/properties",
            get(handlers::properties_query).post(handlers::properties_form),
        )
        .route("/torrents/add", post(handlers::add_torrents))
        .route(
            "/torrents/delete",
            get(handlers::delete_query).post(handlers::delete_form),
        );

    Router::new()
        .nest("/api/v2", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
