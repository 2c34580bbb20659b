//! 自愈守护进程
//!
//! 周期性扫描托管容器，对非 running/restarting 的实例先尝试重启，
//! 重启无效时经编排器以 `<app>:latest` 重新部署。同一容器同一时刻最多只有一次修复。

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    HEAL_GRACE_SECS, HEAL_RESTART_TIMEOUT_SECS, HEAL_STOP_GRACE_SECS, MANAGED_NAMESPACE,
};
use crate::domain::{ContainerInstance, DeployRequest, LabelFilter};
use crate::error::HealError;
use crate::infra::ContainerRuntime;
use crate::services::deploy::DeploymentOrchestrator;
use crate::services::metrics::Metrics;

/// 正在修复中的容器 ID 集合
///
/// 锁只保护成员判断与增删，不覆盖修复过程本身
#[derive(Debug, Default)]
pub struct HealingRegistry {
    in_progress: Mutex<HashSet<String>>,
}

impl HealingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 原子地检查并登记；已在修复中时返回 `None`
    ///
    /// 返回的 guard 在 drop 时移除登记
    pub fn try_acquire(&self, id: &str) -> Option<HealingGuard<'_>> {
        if self.lock().insert(id.to_string()) {
            Some(HealingGuard {
                registry: self,
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// 当前修复中的 ID（排序后）
    pub fn in_progress(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// 修复登记，drop 时释放
pub struct HealingGuard<'a> {
    registry: &'a HealingRegistry,
    id: String,
}

impl Drop for HealingGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// 自愈守护进程
pub struct SelfHealingDaemon {
    interval: Duration,
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Option<Arc<DeploymentOrchestrator>>,
    registry: HealingRegistry,
    metrics: Metrics,
    running: AtomicBool,
}

impl SelfHealingDaemon {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Option<Arc<DeploymentOrchestrator>>,
        interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            interval,
            runtime,
            orchestrator,
            registry: HealingRegistry::new(),
            metrics,
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &HealingRegistry {
        &self.registry
    }

    /// 主循环是否在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 运行直到 `shutdown` 被取消
    ///
    /// 取消只打断两轮之间的等待，不打断进行中的修复
    pub async fn start(&self, shutdown: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            interval_secs = self.interval.as_secs(),
            namespace = MANAGED_NAMESPACE,
            "Self-healing daemon started"
        );

        while !shutdown.is_cancelled() {
            let healed = self.check_health().await;
            if !healed.is_empty() {
                info!(count = healed.len(), "Healed containers");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Self-healing daemon stopped");
    }

    /// 扫描一轮，返回本轮修复成功的实例
    pub async fn check_health(&self) -> Vec<ContainerInstance> {
        let instances = match self
            .runtime
            .list(&LabelFilter::managed_by(MANAGED_NAMESPACE))
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "Failed to list managed containers");
                return Vec::new();
            }
        };

        let running = instances.iter().filter(|c| c.is_running()).count();
        let unhealthy: Vec<ContainerInstance> = instances
            .into_iter()
            .filter(|c| !c.status.is_healthy())
            .collect();

        if unhealthy.is_empty() {
            debug!(running, "All managed containers healthy");
            self.metrics.active_containers.set(running as i64);
            return Vec::new();
        }

        warn!(count = unhealthy.len(), "Found unhealthy containers");

        let heals = unhealthy.into_iter().filter_map(move |instance| {
            let Some(guard) = self.registry.try_acquire(&instance.id) else {
                debug!(container = %instance.short_id(), "Already being healed, skipping");
                return None;
            };
            Some(async move {
                let _guard = guard;
                self.heal(&instance).await.then_some(instance)
            })
        });

        let healed: Vec<ContainerInstance> = join_all(heals).await.into_iter().flatten().collect();
        // 修复会增删实例，重新列出后再更新
        self.metrics.refresh_active(self.runtime.as_ref()).await;
        healed
    }

    /// 修复单个实例；任何错误都只记录日志并返回 false
    pub async fn heal(&self, instance: &ContainerInstance) -> bool {
        match self.try_heal(instance).await {
            Ok(()) => {
                self.metrics.heal_success_total.inc();
                true
            }
            Err(e) => {
                error!(container = %instance.short_id(), app = ?instance.app(), error = %e, "Heal failed");
                false
            }
        }
    }

    async fn try_heal(&self, instance: &ContainerInstance) -> Result<(), HealError> {
        let container = instance.short_id();
        info!(
            container = %container,
            app = ?instance.app(),
            status = %instance.status,
            "Attempting to heal container"
        );

        let restart = self
            .runtime
            .restart(&instance.id, Duration::from_secs(HEAL_RESTART_TIMEOUT_SECS))
            .await;

        let failure = match restart {
            Ok(()) => {
                tokio::time::sleep(Duration::from_secs(HEAL_GRACE_SECS)).await;
                match self.runtime.get(&instance.id).await {
                    Ok(current) if current.is_running() => {
                        info!(container = %container, "Container restarted successfully");
                        return Ok(());
                    }
                    Ok(current) => HealError::StillDown(current.status.to_string()),
                    Err(e) => HealError::RestartFailed(e),
                }
            }
            Err(e) if e.is_not_found() => {
                warn!(container = %container, "Container no longer exists");
                HealError::RestartFailed(e)
            }
            Err(e) => HealError::RestartFailed(e),
        };

        let (Some(orchestrator), Some(app)) = (&self.orchestrator, instance.app()) else {
            return Err(failure);
        };

        warn!(container = %container, app = %app, reason = %failure, "Restart did not recover container, redeploying");
        self.redeploy(orchestrator, instance, app).await
    }

    async fn redeploy(
        &self,
        orchestrator: &DeploymentOrchestrator,
        instance: &ContainerInstance,
        app: &str,
    ) -> Result<(), HealError> {
        if let Err(e) = self
            .runtime
            .stop(&instance.id, Duration::from_secs(HEAL_STOP_GRACE_SECS))
            .await
        {
            debug!(container = %instance.short_id(), error = %e, "Stop before redeploy failed");
        }
        if let Err(e) = self.runtime.remove(&instance.id, true).await {
            debug!(container = %instance.short_id(), error = %e, "Remove before redeploy failed");
        }

        let mut request = DeployRequest::new(app, format!("{}:latest", app));
        request.container_port = instance.declared_port();

        let outcome = orchestrator.deploy(&request).await;
        if outcome.is_ok() {
            info!(
                app = %app,
                old_container = %instance.short_id(),
                new_container = ?outcome.container_id(),
                "Redeployed container"
            );
            Ok(())
        } else {
            Err(HealError::RedeployFailed {
                app: app.to_string(),
                reason: outcome.error().unwrap_or("unknown error").to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckConfig;
    use crate::domain::{labels, ContainerStatus};
    use crate::infra::fake::{Call, FakeRuntime, RestartBehavior};

    fn daemon(fake: &Arc<FakeRuntime>, with_orchestrator: bool) -> SelfHealingDaemon {
        let runtime: Arc<dyn ContainerRuntime> = fake.clone();
        let metrics = Metrics::new().unwrap();
        let orchestrator = with_orchestrator.then(|| {
            Arc::new(
                DeploymentOrchestrator::new(
                    runtime.clone(),
                    HealthCheckConfig::default(),
                    metrics.clone(),
                )
                .unwrap(),
            )
        });
        SelfHealingDaemon::new(runtime, orchestrator, Duration::from_secs(10), metrics)
    }

    #[test]
    fn test_registry_guard_releases_on_drop() {
        let registry = HealingRegistry::new();

        let guard = registry.try_acquire("c1").unwrap();
        assert!(registry.try_acquire("c1").is_none());
        assert!(registry.try_acquire("c2").is_some());
        assert_eq!(registry.in_progress(), vec!["c1".to_string()]);

        drop(guard);
        assert!(!registry.contains("c1"));
        assert!(registry.try_acquire("c1").is_some());
    }

    #[tokio::test]
    async fn test_healthy_containers_are_left_alone() {
        let fake = FakeRuntime::new();
        fake.add("web", ContainerStatus::Running);
        fake.add("api", ContainerStatus::Restarting);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert!(healed.is_empty());
        assert_eq!(fake.mutating_calls(), 0);
        assert_eq!(daemon.metrics.active_containers.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_recovers_container() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert_eq!(healed.len(), 1);
        assert_eq!(healed[0].id, id);
        assert_eq!(fake.status_of(&id), Some(ContainerStatus::Running));
        assert_eq!(fake.count(|c| matches!(c, Call::Run(_))), 0);
        assert_eq!(daemon.metrics.heal_success_total.get(), 1);
        assert!(daemon.registry().in_progress().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_container_is_redeployed() {
        let fake = FakeRuntime::new();
        let id = fake.add_with_labels(
            &[
                (labels::APP, "web"),
                (labels::MANAGED_BY, MANAGED_NAMESPACE),
                (labels::CONTAINER_PORT, "8080"),
            ],
            ContainerStatus::Exited,
        );
        fake.set_restart(&id, RestartBehavior::NotFound);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert_eq!(healed.len(), 1);
        assert!(fake.calls().contains(&Call::Run("web:latest".to_string())));
        assert!(!fake.exists(&id));
        let new_id = fake.ids().into_iter().find(|c| *c != id).unwrap();
        let recreated = fake.instance(&new_id).unwrap();
        assert_eq!(recreated.labels[labels::CONTAINER_PORT], "8080");
        assert_eq!(recreated.app(), Some("web"));
        assert_eq!(daemon.metrics.heal_success_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redeploy_does_not_copy_image_env() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_env(
            &id,
            &[
                ("PATH", "/usr/local/node-18/bin:/usr/bin"),
                ("NODE_VERSION", "18.0.0"),
            ],
        );
        fake.set_restart(&id, RestartBehavior::NotFound);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert_eq!(healed.len(), 1);
        let new_id = fake.ids().into_iter().find(|c| *c != id).unwrap();
        let recreated = fake.instance(&new_id).unwrap();
        assert!(!recreated.env.contains_key("PATH"));
        assert!(!recreated.env.contains_key("NODE_VERSION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gauge_reflects_instances_after_heal() {
        let fake = FakeRuntime::new();
        fake.add("api", ContainerStatus::Running);
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::StayDown);
        // 重新部署成功但新实例没有跑起来
        fake.set_run_status(ContainerStatus::Exited);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert_eq!(healed.len(), 1);
        assert_eq!(daemon.metrics.active_containers.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_down_after_restart_is_redeployed() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::StayDown);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert_eq!(healed.len(), 1);
        assert!(fake.calls().contains(&Call::Stop(id.clone())));
        assert!(fake.calls().contains(&Call::Remove(id.clone())));
        assert_eq!(fake.count(|c| matches!(c, Call::Run(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_redeploy_without_app_label() {
        let fake = FakeRuntime::new();
        let id = fake.add_with_labels(&[(labels::MANAGED_BY, MANAGED_NAMESPACE)], ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::StayDown);
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert!(healed.is_empty());
        assert_eq!(fake.count(|c| matches!(c, Call::Run(_))), 0);
        assert!(fake.exists(&id));
    }

    #[tokio::test]
    async fn test_no_redeploy_without_orchestrator() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::Error);
        let daemon = daemon(&fake, false);

        assert!(!daemon.heal(&fake.instance(&id).unwrap()).await);
        assert_eq!(fake.count(|c| matches!(c, Call::Run(_))), 0);
        assert_eq!(daemon.metrics.heal_success_total.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_redeploy_reports_false() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::Error);
        fake.set_run_error("manifest for web:latest not found");
        let daemon = daemon(&fake, true);

        let healed = daemon.check_health().await;

        assert!(healed.is_empty());
        assert_eq!(daemon.metrics.heal_success_total.get(), 0);
        assert!(daemon.registry().in_progress().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_yields_empty_cycle() {
        let fake = FakeRuntime::new();
        fake.add("web", ContainerStatus::Exited);
        fake.set_list_fails(true);
        let daemon = daemon(&fake, true);

        assert!(daemon.check_health().await.is_empty());
        assert_eq!(fake.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_heal_is_retried_next_cycle() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        fake.set_restart(&id, RestartBehavior::Error);
        let daemon = daemon(&fake, false);

        daemon.check_health().await;
        daemon.check_health().await;

        assert_eq!(fake.count(|c| *c == Call::Restart(id.clone())), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_is_never_healed_twice_concurrently() {
        let fake = FakeRuntime::new();
        let id = fake.add("web", ContainerStatus::Exited);
        let gate = fake.gate_restarts();
        let daemon = Arc::new(daemon(&fake, true));

        let first = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.check_health().await })
        };
        fake.restart_entered.notified().await;
        assert!(daemon.registry().contains(&id));

        let second = daemon.check_health().await;
        assert!(second.is_empty());
        assert_eq!(fake.count(|c| matches!(c, Call::Restart(_))), 1);

        gate.notify_one();
        let healed = first.await.unwrap();
        assert_eq!(healed.len(), 1);
        assert!(!daemon.registry().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stops_on_shutdown() {
        let fake = FakeRuntime::new();
        fake.add("web", ContainerStatus::Running);
        let daemon = Arc::new(daemon(&fake, true));
        let shutdown = CancellationToken::new();

        let handle = {
            let daemon = daemon.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { daemon.start(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(daemon.is_running());
        shutdown.cancel();
        handle.await.unwrap();

        assert!(!daemon.is_running());
        assert_eq!(fake.count(|c| matches!(c, Call::List(_))), 3);
    }
}
