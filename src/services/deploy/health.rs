//! 部署后健康检查

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::ContainerInstance;

use super::DeploymentOrchestrator;

impl DeploymentOrchestrator {
    /// 轮询直到实例健康、超时或被取消
    ///
    /// 每轮先从运行时刷新实例：非 running 视为未就绪；有可解析的宿主机端口时
    /// 再做一次 HTTP 探测，状态码 < 500 为健康，5xx 计为一次失败。
    /// 没有发布端口，或端口不响应 HTTP（redis 等非 HTTP 服务）时 running 即健康。
    pub async fn health_check(
        &self,
        instance: &mut ContainerInstance,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let container = instance.short_id().to_string();
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            attempts += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(container = %container, "Health check cancelled");
                    return false;
                }
                result = self.check_once(instance) => result,
            };

            match result {
                Ok(()) => return true,
                Err(reason) => {
                    debug!(container = %container, attempt = attempts, reason = %reason, "Not healthy yet");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(container = %container, "Health check cancelled");
                    return false;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        error!(
            container = %container,
            attempts,
            timeout_secs = timeout.as_secs(),
            "Health check timeout"
        );
        false
    }

    async fn check_once(&self, instance: &mut ContainerInstance) -> Result<(), String> {
        self.runtime
            .refresh(instance)
            .await
            .map_err(|e| format!("refresh failed: {}", e))?;

        if !instance.is_running() {
            return Err(format!("status {}", instance.status));
        }

        let Some(port) = instance.host_port() else {
            info!(container = %instance.short_id(), "Container running (no published port)");
            return Ok(());
        };

        match self.probe.get(port).await {
            Ok(code) if code < 500 => {
                info!(
                    container = %instance.short_id(),
                    host_port = port,
                    http_status = code,
                    "Container healthy"
                );
                Ok(())
            }
            Ok(code) => Err(format!("HTTP {} from {}", code, self.probe.url(port))),
            Err(e) => {
                info!(
                    container = %instance.short_id(),
                    host_port = port,
                    error = %e,
                    "Container running (no HTTP endpoint)"
                );
                Ok(())
            }
        }
    }
}
