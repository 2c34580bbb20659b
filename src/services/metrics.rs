//! Prometheus metrics
//!
//! Each process owns one registry; the orchestrator and the healer update it
//! as a side effect of deploys and heals, `/metrics` exports it.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::config::env::constants::MANAGED_NAMESPACE;
use crate::domain::LabelFilter;
use crate::infra::ContainerRuntime;

/// Metrics shared by the orchestrator and the healer
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Deploy attempts by result (`ok`, `failed`, `rolled_back`)
    pub deployments_total: IntCounterVec,
    /// Containers successfully restored by the healer
    pub heal_success_total: IntCounter,
    /// Currently running managed containers
    pub active_containers: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let deployments_total = IntCounterVec::new(
            Opts::new("paas_deployments_total", "Total deployments by result"),
            &["result"],
        )?;
        registry.register(Box::new(deployments_total.clone()))?;

        let heal_success_total = IntCounter::new(
            "paas_healer_restarts_total",
            "Total containers restored by the self-healing daemon",
        )?;
        registry.register(Box::new(heal_success_total.clone()))?;

        let active_containers = IntGauge::new(
            "paas_active_containers",
            "Number of currently running managed containers",
        )?;
        registry.register(Box::new(active_containers.clone()))?;

        Ok(Self {
            registry,
            deployments_total,
            heal_success_total,
            active_containers,
        })
    }

    pub fn record_deploy(&self, result: &str) {
        self.deployments_total.with_label_values(&[result]).inc();
    }

    pub fn deploys(&self, result: &str) -> u64 {
        self.deployments_total.with_label_values(&[result]).get()
    }

    /// Re-list managed containers and set the gauge to the running count.
    /// A failed listing leaves the gauge unchanged.
    pub async fn refresh_active(&self, runtime: &dyn ContainerRuntime) {
        match runtime.list(&LabelFilter::managed_by(MANAGED_NAMESPACE)).await {
            Ok(instances) => {
                let running = instances.iter().filter(|c| c.is_running()).count();
                self.active_containers.set(running as i64);
            }
            Err(e) => debug!(error = %e, "Skipping active container gauge update"),
        }
    }

    /// Prometheus text exposition format
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
