// 应用信息API处理器

use crate::server::AppState;
use axum::{extract::State, response::Json};
use serde::Serialize;

/// 对外声明的 qBittorrent 版本
pub const APP_VERSION: &str = "v4.6.0";
pub const WEBAPI_VERSION: &str = "2.9.3";

/// 应用偏好设置
#[derive(Debug, Serialize)]
pub struct Preferences {
    pub save_path: String,
    pub temp_path_enabled: bool,
    pub max_active_downloads: usize,
    /// 单分片限速（字节/秒），0 表示不限速
    pub dl_limit: u64,
}

/// GET /api/v2/app/version
pub async fn app_version() -> &'static str {
    APP_VERSION
}

/// GET /api/v2/app/webapiVersion
pub async fn webapi_version() -> &'static str {
    WEBAPI_VERSION
}

/// GET /api/v2/app/preferences
pub async fn preferences(State(state): State<AppState>) -> Json<Preferences> {
    let downloader = &state.config.downloader;
    Json(Preferences {
        save_path: downloader.save_path.to_string_lossy().to_string(),
        temp_path_enabled: false,
        max_active_downloads: downloader.max_concurrent_downloads,
        dl_limit: downloader.speed_limit_kbps * 1024,
    })
}
