// 认证API处理器

use crate::server::AppState;
use axum::{
    extract::{Query, State},
    response::Response,
    Form,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{fails, ok};

/// 登录参数
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// 登录（查询参数）
///
/// GET /api/v2/auth/login?username=xxx&password=xxx
pub async fn login_query(State(state): State<AppState>, Query(params): Query<LoginParams>) -> Response {
    check_login(&state, &params)
}

/// 登录（表单）
///
/// POST /api/v2/auth/login
pub async fn login_form(State(state): State<AppState>, Form(params): Form<LoginParams>) -> Response {
    check_login(&state, &params)
}

fn check_login(state: &AppState, params: &LoginParams) -> Response {
    let server = &state.config.server;
    if params.username == server.username && params.password == server.password {
        info!("API: 用户 {} 登录成功", params.username);
        ok()
    } else {
        warn!("API: 用户 {} 登录失败", params.username);
        fails()
    }
}
