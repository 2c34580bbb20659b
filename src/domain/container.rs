//! 容器相关领域模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ports::{resolve_host_port, RawPortMapping};

/// 编排器与自愈守护进程之间约定的标签
pub mod labels {
    /// 应用名
    pub const APP: &str = "app";
    /// 所属命名空间
    pub const MANAGED_BY: &str = "managed_by";
    /// 声明的容器内部端口（字符串编码）
    pub const CONTAINER_PORT: &str = "container_port";
}

/// 容器生命周期状态
///
/// 运行时返回的未知状态统一落到 `Unknown`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Restarting,
    Created,
    Exited,
    Stopped,
    Unknown,
}

impl ContainerStatus {
    /// 从运行时返回的字符串解析
    pub fn from_runtime(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "created" => ContainerStatus::Created,
            "exited" => ContainerStatus::Exited,
            "stopped" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Created => "created",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Unknown => "unknown",
        }
    }

    /// 运行中或正在重启的容器不需要修复
    pub fn is_healthy(&self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Restarting)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 截取 12 位短 ID 用于日志
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// 容器实例
#[derive(Debug, Clone)]
pub struct ContainerInstance {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// 原始端口发布数据，只通过解析器读取
    pub ports: RawPortMapping,
}

impl ContainerInstance {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// 所属应用名（`app` 标签）
    pub fn app(&self) -> Option<&str> {
        self.labels
            .get(labels::APP)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// 部署时声明的容器端口
    pub fn declared_port(&self) -> Option<u16> {
        self.labels
            .get(labels::CONTAINER_PORT)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|port| *port != 0)
    }

    /// 解析后的宿主机端口
    pub fn host_port(&self) -> Option<u16> {
        resolve_host_port(&self.ports)
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// 标签过滤条件 `key=value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: String,
}

impl LabelFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// 某个应用的所有实例
    pub fn app(name: &str) -> Self {
        Self::new(labels::APP, name)
    }

    /// 某个命名空间托管的所有实例
    pub fn managed_by(namespace: &str) -> Self {
        Self::new(labels::MANAGED_BY, namespace)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// 启动容器的请求
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// 需要发布的容器端口，映射到运行时选择的临时宿主机端口
    pub publish: Option<u16>,
}

/// `GET /containers` 中的单个容器
#[derive(Debug, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub app: Option<String>,
    pub status: ContainerStatus,
    pub host_port: Option<u16>,
}

impl From<&ContainerInstance> for ContainerSummary {
    fn from(instance: &ContainerInstance) -> Self {
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            app: instance.app().map(str::to_string),
            status: instance.status,
            host_port: instance.host_port(),
        }
    }
}

/// 容器列表响应
#[derive(Debug, Serialize)]
pub struct ContainersResponse {
    pub containers: Vec<ContainerSummary>,
}
