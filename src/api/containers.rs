//! 托管容器 API
//!
//! GET /containers

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use tracing::error;

use crate::config::env::constants::MANAGED_NAMESPACE;
use crate::domain::container::{ContainerSummary, ContainersResponse};
use crate::domain::LabelFilter;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 创建容器路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/containers", get(list_containers))
}

/// 列出本系统托管的所有容器（包括已停止的）
///
/// 运行时不可达时返回 503
async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ContainersResponse>> {
    let instances = state
        .runtime
        .list(&LabelFilter::managed_by(MANAGED_NAMESPACE))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list managed containers");
            ApiError::from(e)
        })?;

    Ok(Json(ContainersResponse {
        containers: instances.iter().map(ContainerSummary::from).collect(),
    }))
}
