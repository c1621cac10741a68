// API处理器模块

pub mod app;
pub mod auth;
pub mod torrents;

pub use app::*;
pub use auth::*;
pub use torrents::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// 命令成功
pub(crate) fn ok() -> Response {
    (StatusCode::OK, "Ok.").into_response()
}

/// 命令失败
pub(crate) fn fails() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Fails.").into_response()
}
