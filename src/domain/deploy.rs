//! 部署相关领域模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 部署请求
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployRequest {
    /// 应用名，同时作为 `app` 标签
    pub app: String,
    /// 镜像 tag
    pub image: String,
    /// 容器内部端口，为空时不发布端口
    #[serde(default)]
    pub container_port: Option<u16>,
    /// 环境变量
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DeployRequest {
    pub fn new(app: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            image: image.into(),
            container_port: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// 部署结果状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Failed,
}

/// 部署结果
///
/// 构造后不可变，`deploy` 与 `deploy_with_rollback` 都返回它而不是错误
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DeploymentOutcome {
    status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DeploymentOutcome {
    pub fn ok(container_id: impl Into<String>, container_port: Option<u16>, host_port: Option<u16>) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            container_id: Some(container_id.into()),
            container_port,
            host_port,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            container_id: None,
            container_port: None,
            host_port: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn container_port(&self) -> Option<u16> {
        self.container_port
    }

    pub fn host_port(&self) -> Option<u16> {
        self.host_port
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
