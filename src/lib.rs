//! PaaS Agent - 单机容器部署代理
//!
//! 事务式部署（健康检查 + 自动回滚）与自愈守护进程

pub mod error;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::env::constants::VERSION;
use crate::config::EnvConfig;
use crate::domain::{ContainerInstance, DeployRequest, DeploymentOutcome};
use crate::error::InitError;
use crate::state::AppState;

/// 命令行覆盖项，优先于环境变量
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖状态 API 端口
    pub port_override: Option<u16>,
    /// 覆盖自愈扫描间隔
    pub interval_override: Option<Duration>,
    /// 禁用自愈守护进程
    pub disable_healer: bool,
}

impl RuntimeConfig {
    /// 读取环境配置并应用命令行覆盖
    pub fn load(&self) -> EnvConfig {
        let mut config = EnvConfig::from_env();
        if let Some(port) = self.port_override {
            config.port = port;
        }
        if let Some(interval) = self.interval_override {
            config.heal_interval = interval;
        }
        if self.disable_healer {
            config.healer_enabled = false;
        }
        config
    }
}

/// 初始化日志，默认 info，可由 RUST_LOG 覆盖
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// serve 模式：启动自愈守护进程和状态 API，直到收到关闭信号
pub async fn run_agent(config: RuntimeConfig) -> Result<(), InitError> {
    let state = Arc::new(AppState::new(config.load())?);
    serve(state).await
}

/// 在给定状态上运行守护进程和 HTTP 服务
pub async fn serve(state: Arc<AppState>) -> Result<(), InitError> {
    let shutdown = state.shutdown.clone();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let healer_task = if state.config.healer_enabled {
        let healer = state.healer.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move { healer.start(shutdown).await }))
    } else {
        info!("Self-healing daemon disabled");
        None
    };

    let port = state.config.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| InitError::Bind { port, source })?;
    info!(%addr, version = VERSION, "PaaS agent listening");

    let served = axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await;

    // 服务异常退出时也要停止守护进程
    shutdown.cancel();
    if let Some(task) = healer_task {
        if let Err(e) = task.await {
            error!(error = %e, "Self-healing daemon task failed");
        }
    }

    served.map_err(InitError::Serve)?;
    info!("PaaS agent stopped");
    Ok(())
}

/// 一次性部署，Ctrl-C 会取消健康检查并触发回滚
pub async fn deploy_once(config: RuntimeConfig, request: DeployRequest) -> Result<DeploymentOutcome, InitError> {
    let state = AppState::new(config.load())?;
    tokio::spawn(shutdown_signal(state.shutdown.clone()));
    Ok(state
        .orchestrator
        .deploy_with_rollback(&request, &state.shutdown)
        .await)
}

/// 执行一轮自愈扫描，返回修复成功的实例
pub async fn heal_once(config: RuntimeConfig) -> Result<Vec<ContainerInstance>, InitError> {
    let state = AppState::new(config.load())?;
    Ok(state.healer.check_health().await)
}

/// 等待 Ctrl-C 或 SIGTERM 后取消 token
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = cancel.cancelled() => return,
    }
    cancel.cancel();
}
