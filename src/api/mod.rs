//! API 模块
//!
//! 只读状态接口：健康、托管容器、指标

pub mod containers;
pub mod health;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Metrics
        .merge(health::router())
        // Containers
        .merge(containers::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
