//! 服务层模块
//!
//! 部署编排、自愈守护进程与指标

pub mod deploy;
pub mod healer;
pub mod metrics;

pub use deploy::DeploymentOrchestrator;
pub use healer::{HealingRegistry, SelfHealingDaemon};
pub use metrics::Metrics;
