//! 基础设施模块
//!
//! 封装外部依赖（容器运行时、HTTP 探针、命令执行）

pub mod command;
pub mod docker;
pub mod probe;
pub mod runtime;

#[cfg(test)]
pub mod fake;

pub use command::CommandRunner;
pub use docker::DockerCli;
pub use probe::HttpProbe;
pub use runtime::{ContainerRuntime, RuntimeError, RuntimeResult};
