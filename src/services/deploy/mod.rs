//! 部署编排
//!
//! `deploy` 启动一个带标签的新实例；`deploy_with_rollback` 在此基础上做
//! 健康检查，通过后清理同一应用的旧实例，失败则移除新实例、保留旧实例。

mod health;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    CLEANUP_STOP_GRACE_SECS, MANAGED_NAMESPACE, ROLLBACK_STOP_GRACE_SECS,
};
use crate::config::HealthCheckConfig;
use crate::domain::{
    labels, short_id, ContainerInstance, DeployRequest, DeploymentOutcome, LabelFilter, RunSpec,
};
use crate::error::DeployError;
use crate::infra::{ContainerRuntime, HttpProbe, RuntimeError};
use crate::services::metrics::Metrics;

/// 实例名序号，避免同一毫秒内的名字冲突
static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// 部署编排器
pub struct DeploymentOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    probe: HttpProbe,
    health: HealthCheckConfig,
    metrics: Metrics,
    /// 每个应用一把锁，串行化同一应用的 `deploy_with_rollback`
    app_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        health: HealthCheckConfig,
        metrics: Metrics,
    ) -> Result<Self, reqwest::Error> {
        let probe = HttpProbe::new(health.probe_timeout, health.probe_path.clone())?;
        Ok(Self {
            runtime,
            probe,
            health,
            metrics,
            app_locks: Mutex::new(HashMap::new()),
        })
    }

    /// 启动新实例
    ///
    /// 不做健康检查也不触碰旧实例；任何失败都写入返回的 `DeploymentOutcome`
    pub async fn deploy(&self, request: &DeployRequest) -> DeploymentOutcome {
        match self.start_instance(request).await {
            Ok(instance) => {
                let host_port = instance.host_port();
                if request.container_port.is_some() && host_port.is_none() {
                    warn!(
                        container = %instance.short_id(),
                        app = %request.app,
                        "Could not resolve host port"
                    );
                }
                info!(
                    container = %instance.short_id(),
                    app = %request.app,
                    host_port = ?host_port,
                    "Container started"
                );
                self.refresh_active_gauge().await;
                DeploymentOutcome::ok(instance.id, request.container_port, host_port)
            }
            Err(e) => {
                error!(app = %request.app, image = %request.image, error = %e, "Deploy failed");
                DeploymentOutcome::failed(e.to_string())
            }
        }
    }

    async fn start_instance(&self, request: &DeployRequest) -> Result<ContainerInstance, DeployError> {
        let spec = self.run_spec(request);
        info!(
            app = %request.app,
            image = %request.image,
            name = %spec.name,
            container_port = ?request.container_port,
            "Starting container"
        );

        let mut instance = self
            .runtime
            .run(&spec)
            .await
            .map_err(DeployError::from_create)?;

        // 端口绑定在启动后才可见
        self.runtime
            .refresh(&mut instance)
            .await
            .map_err(|source| DeployError::InstanceUnavailable {
                container: instance.short_id().to_string(),
                source,
            })?;

        Ok(instance)
    }

    fn run_spec(&self, request: &DeployRequest) -> RunSpec {
        let mut run_labels = std::collections::BTreeMap::new();
        run_labels.insert(labels::APP.to_string(), request.app.clone());
        run_labels.insert(labels::MANAGED_BY.to_string(), MANAGED_NAMESPACE.to_string());
        if let Some(port) = request.container_port {
            run_labels.insert(labels::CONTAINER_PORT.to_string(), port.to_string());
        }

        RunSpec {
            image: request.image.clone(),
            name: instance_name(&request.app),
            labels: run_labels,
            env: request.env.clone(),
            publish: request.container_port,
        }
    }

    /// 零停机部署：启动、健康检查、清理旧实例，失败时回滚
    ///
    /// 同一应用的调用串行执行；取消发生在健康检查期间时按失败处理并回滚
    pub async fn deploy_with_rollback(
        &self,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> DeploymentOutcome {
        info!(app = %request.app, image = %request.image, "Starting deployment");

        let lock = self.app_lock(&request.app);
        let guard = tokio::select! {
            guard = lock.lock_owned() => guard,
            _ = cancel.cancelled() => {
                warn!(app = %request.app, "Deployment cancelled while waiting for previous deployment");
                self.release_app_lock(&request.app);
                self.metrics.record_deploy("failed");
                return DeploymentOutcome::failed(DeployError::Cancelled.to_string());
            }
        };

        let outcome = match self.transaction(request, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(app = %request.app, error = %e, "Unexpected deployment error");
                self.metrics.record_deploy("failed");
                DeploymentOutcome::failed(format!("Unexpected error: {}", e))
            }
        };

        drop(guard);
        self.release_app_lock(&request.app);
        outcome
    }

    async fn transaction(
        &self,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome, DeployError> {
        let existing = self
            .runtime
            .list(&LabelFilter::app(&request.app))
            .await
            .map_err(DeployError::Snapshot)?;
        debug!(app = %request.app, count = existing.len(), "Existing containers");

        let outcome = self.deploy(request).await;
        let Some(new_id) = outcome.container_id().map(str::to_string) else {
            self.metrics.record_deploy("failed");
            return Ok(outcome);
        };

        if let Err(e) = self.verify(&new_id, cancel).await {
            error!(
                container = %short_id(&new_id),
                app = %request.app,
                error = %e,
                "Deployment failed - rolling back"
            );
            self.rollback(&new_id).await;
            self.metrics.record_deploy("rolled_back");
            return Ok(DeploymentOutcome::failed(format!(
                "Deployment rolled back: {}",
                e
            )));
        }

        info!(
            container = %short_id(&new_id),
            app = %request.app,
            "Health check passed - cleaning up old containers"
        );
        for old in existing.iter().filter(|c| c.id != new_id) {
            if let Err(source) = self
                .stop_and_remove(&old.id, Duration::from_secs(CLEANUP_STOP_GRACE_SECS))
                .await
            {
                let e = DeployError::CleanupFailed {
                    container: old.short_id().to_string(),
                    source,
                };
                warn!(app = %request.app, error = %e, "Failed to clean up old container");
            } else {
                info!(container = %old.short_id(), app = %request.app, "Removed old container");
            }
        }

        self.refresh_active_gauge().await;
        self.metrics.record_deploy("ok");
        info!(container = %short_id(&new_id), app = %request.app, "Deployment completed");
        Ok(outcome)
    }

    async fn verify(&self, id: &str, cancel: &CancellationToken) -> Result<(), DeployError> {
        let mut instance = self
            .runtime
            .get(id)
            .await
            .map_err(|source| DeployError::InstanceUnavailable {
                container: short_id(id).to_string(),
                source,
            })?;

        let healthy = self
            .health_check(&mut instance, self.health.timeout, self.health.interval, cancel)
            .await;

        if healthy {
            Ok(())
        } else if cancel.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Err(DeployError::HealthCheckTimeout {
                container: short_id(id).to_string(),
            })
        }
    }

    async fn rollback(&self, id: &str) {
        match self
            .stop_and_remove(id, Duration::from_secs(ROLLBACK_STOP_GRACE_SECS))
            .await
        {
            Ok(()) => info!(container = %short_id(id), "Rolled back new container"),
            Err(source) => {
                let e = DeployError::RollbackFailed {
                    container: short_id(id).to_string(),
                    source,
                };
                error!(error = %e, "Rollback failed");
            }
        }
    }

    /// 尽力停止后强制删除；实例已不存在时视为成功
    async fn stop_and_remove(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        if let Err(e) = self.runtime.stop(id, grace).await {
            if e.is_not_found() {
                return Ok(());
            }
            warn!(container = %short_id(id), error = %e, "Stop failed, forcing removal");
        }

        match self.runtime.remove(id, true).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn refresh_active_gauge(&self) {
        self.metrics.refresh_active(self.runtime.as_ref()).await;
    }

    fn app_lock(&self, app: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.app_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(app.to_string()).or_default().clone()
    }

    /// 没有其他持有者或等待者时移除应用锁
    fn release_app_lock(&self, app: &str) {
        let mut locks = self.app_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(app).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(app);
        }
    }
}

/// `<app>-<毫秒时间戳>-<序号>`
fn instance_name(app: &str) -> String {
    format!(
        "{}-{}-{}",
        app,
        Utc::now().timestamp_millis(),
        INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}
