//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EnvConfig;
use crate::error::InitError;
use crate::infra::{ContainerRuntime, DockerCli};
use crate::services::{DeploymentOrchestrator, Metrics, SelfHealingDaemon};

/// 应用状态
///
/// 运行时客户端在这里构造一次，显式注入编排器和自愈守护进程
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 容器运行时客户端
    pub runtime: Arc<dyn ContainerRuntime>,
    /// 部署编排器
    pub orchestrator: Arc<DeploymentOrchestrator>,
    /// 自愈守护进程
    pub healer: Arc<SelfHealingDaemon>,
    /// 指标
    pub metrics: Metrics,
    /// 关闭信号，取消后守护进程和 HTTP 服务退出
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 使用 docker CLI 作为运行时
    pub fn new(config: EnvConfig) -> Result<Self, InitError> {
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCli::new(config.docker_bin.clone(), config.docker_timeout));
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(
        config: EnvConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, InitError> {
        tracing::info!(
            port = config.port,
            docker_bin = %config.docker_bin,
            healer_enabled = config.healer_enabled,
            heal_interval_secs = config.heal_interval.as_secs(),
            health_check_timeout_secs = config.health_check.timeout.as_secs(),
            probe_path = %config.health_check.probe_path,
            "Loaded configuration"
        );

        let metrics = Metrics::new()?;
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            runtime.clone(),
            config.health_check.clone(),
            metrics.clone(),
        )?);
        let healer = Arc::new(SelfHealingDaemon::new(
            runtime.clone(),
            Some(orchestrator.clone()),
            config.heal_interval,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            started_at: Utc::now(),
            runtime,
            orchestrator,
            healer,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
