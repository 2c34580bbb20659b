//! 命令执行器
//!
//! 统一的外部命令执行入口，支持超时控制，超时后子进程会被终止

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout(Duration),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout(d) => write!(f, "Command timed out after {:?}", d),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) => Some(e),
            CommandError::Timeout(_) => None,
        }
    }
}

impl CommandRunner {
    /// 执行命令并收集输出
    ///
    /// 非零退出码不视为错误，由调用者检查 `status`
    pub async fn run(program: &str, args: &[String], timeout: Duration) -> Result<Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => result.map_err(CommandError::SpawnFailed),
            _ = tokio::time::sleep(timeout) => {
                warn!(program = %program, ?timeout, "Command timed out, killing process");
                Err(CommandError::Timeout(timeout))
            }
        }
    }
}
