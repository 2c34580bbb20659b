//! 容器运行时抽象
//!
//! 编排器和自愈守护进程只依赖这个 trait；进程启动时构造一次具体实现，
//! 以 `Arc<dyn ContainerRuntime>` 显式注入，测试中替换为内存实现。

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{ContainerInstance, LabelFilter, RunSpec};

/// 运行时错误
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// 无法连接容器运行时
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// 容器不存在
    #[error("container not found: {0}")]
    NotFound(String),

    /// 运行时命令执行失败
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// 运行时命令超时
    #[error("{0} timed out")]
    Timeout(String),

    /// 运行时输出无法解析
    #[error("failed to parse runtime output: {0}")]
    Parse(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// 容器运行时客户端
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 列出带有指定标签的所有实例（包括已停止的）
    async fn list(&self, filter: &LabelFilter) -> RuntimeResult<Vec<ContainerInstance>>;

    /// 以后台模式启动一个新实例
    async fn run(&self, spec: &RunSpec) -> RuntimeResult<ContainerInstance>;

    /// 按 ID 获取实例
    async fn get(&self, id: &str) -> RuntimeResult<ContainerInstance>;

    async fn restart(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn stop(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// 从运行时刷新实例的状态和端口
    async fn refresh(&self, instance: &mut ContainerInstance) -> RuntimeResult<()> {
        *instance = self.get(&instance.id).await?;
        Ok(())
    }
}
