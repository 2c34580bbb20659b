//! 统一错误处理
//!
//! - `DeployError` / `HealError`：编排与自愈流程内部使用，在边界处转换为结果或日志
//! - `ApiError`：实现 `IntoResponse`，用于状态 API
//! - `InitError`：启动时构造依赖失败

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::infra::runtime::RuntimeError;

/// 部署错误
///
/// `deploy` 与 `deploy_with_rollback` 不会把它返回给调用者，而是写入失败的 `DeploymentOutcome`
#[derive(Debug, Error)]
pub enum DeployError {
    /// 无法连接容器运行时
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// 部署前无法获取现有实例快照
    #[error("failed to list existing containers: {0}")]
    Snapshot(#[source] RuntimeError),

    /// 镜像启动失败
    #[error("failed to create container: {0}")]
    CreateFailed(String),

    /// 新实例创建后无法获取
    #[error("failed to get container {container}: {source}")]
    InstanceUnavailable {
        container: String,
        #[source]
        source: RuntimeError,
    },

    /// 新实例未能在超时内变为健康
    #[error("health check failed for container {container}")]
    HealthCheckTimeout { container: String },

    /// 调用者取消
    #[error("deployment cancelled")]
    Cancelled,

    /// 回滚时清理新实例失败（仅记录日志）
    #[error("rollback cleanup failed for container {container}: {source}")]
    RollbackFailed {
        container: String,
        #[source]
        source: RuntimeError,
    },

    /// 清理旧实例失败（仅记录日志）
    #[error("cleanup failed for old container {container}: {source}")]
    CleanupFailed {
        container: String,
        #[source]
        source: RuntimeError,
    },
}

impl DeployError {
    /// 启动阶段的运行时错误
    pub fn from_create(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            other => Self::CreateFailed(other.to_string()),
        }
    }
}

/// 自愈错误
#[derive(Debug, Error)]
pub enum HealError {
    /// 重启失败且无法重新部署
    #[error("restart failed: {0}")]
    RestartFailed(#[source] RuntimeError),

    /// 重启后仍未运行且无法重新部署
    #[error("container still {0} after restart")]
    StillDown(String),

    /// 重新部署失败
    #[error("redeploy of {app} failed: {reason}")]
    RedeployFailed { app: String, reason: String },
}

/// 启动错误
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to build HTTP probe client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to bind status API on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("status API server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug, Error)]
pub enum ApiError {
    /// 500 - 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
    /// 503 - 服务不可用（如容器运行时无法连接）
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 创建服务不可用错误
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(_) | RuntimeError::Timeout(_) => {
                Self::service_unavailable(err.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
