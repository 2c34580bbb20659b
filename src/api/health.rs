//! 健康检查和指标 API
//!
//! 包含 /health, /metrics 端点

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    healer_running: bool,
    healing_in_progress: Vec<String>,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// 健康检查 - 返回状态、版本、运行时间和自愈状态
///
/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "paas-agent",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        healer_running: state.healer.is_running(),
        healing_in_progress: state.healer.registry().in_progress(),
    })
}

/// Prometheus 指标
///
/// GET /metrics
async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .export()
        .map_err(|e| ApiError::internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
