//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod container;
pub mod deploy;
pub mod ports;

// Re-exports for convenience
pub use container::{labels, short_id, ContainerInstance, ContainerStatus, LabelFilter, RunSpec};
pub use deploy::{DeployRequest, DeploymentOutcome, OutcomeStatus};
pub use ports::{resolve_host_port, HostBinding, PortScalar, RawPortMapping};
