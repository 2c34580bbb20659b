//! Docker CLI runtime
//!
//! Talks to the local engine through the `docker` binary: `docker ps` for
//! discovery and `docker inspect` (JSON) for everything else.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Output;
use std::time::Duration;
use tracing::debug;

use crate::domain::{ContainerInstance, ContainerStatus, LabelFilter, RawPortMapping, RunSpec};

use super::command::{CommandError, CommandRunner};
use super::runtime::{ContainerRuntime, RuntimeError, RuntimeResult};

/// `docker inspect` output, only the fields we read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Value,
}

impl From<InspectEntry> for ContainerInstance {
    fn from(entry: InspectEntry) -> Self {
        let env = entry
            .config
            .env
            .unwrap_or_default()
            .iter()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        Self {
            id: entry.id,
            name: entry.name.trim_start_matches('/').to_string(),
            image: entry.config.image,
            status: ContainerStatus::from_runtime(&entry.state.status),
            labels: entry.config.labels.unwrap_or_default(),
            env,
            ports: RawPortMapping::from_value(&entry.network_settings.ports),
        }
    }
}

/// Docker CLI 实现的容器运行时
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new(docker_bin: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            command_timeout,
        }
    }

    async fn exec(&self, args: Vec<String>, timeout: Duration) -> RuntimeResult<Output> {
        let command = describe(&args);
        debug!(command = %command, "Running docker command");

        CommandRunner::run(&self.docker_bin, &args, timeout)
            .await
            .map_err(|e| match e {
                CommandError::SpawnFailed(e) => {
                    RuntimeError::Unavailable(format!("failed to run {}: {}", self.docker_bin, e))
                }
                CommandError::Timeout(_) => RuntimeError::Timeout(command),
            })
    }

    /// 执行命令，非零退出码转换为 `RuntimeError`
    async fn exec_checked(&self, args: Vec<String>, target: &str, timeout: Duration) -> RuntimeResult<String> {
        let command = describe(&args);
        let output = self.exec(args, timeout).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(classify_failure(
            &command,
            target,
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn inspect(&self, ids: &[String]) -> RuntimeResult<Vec<ContainerInstance>> {
        let mut args = vec!["inspect".to_string()];
        args.extend(ids.iter().cloned());
        let command = describe(&args);
        let target = ids.join(" ");

        let output = self.exec(args, self.command_timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            return parse_inspect(&stdout);
        }

        // 多个 ID 中部分已被删除时，docker 仍会输出其余容器的 JSON
        if stdout.trim_start().starts_with('[') {
            if let Ok(instances) = parse_inspect(&stdout) {
                if !instances.is_empty() {
                    return Ok(instances);
                }
            }
        }

        Err(classify_failure(
            &command,
            &target,
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list(&self, filter: &LabelFilter) -> RuntimeResult<Vec<ContainerInstance>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}", filter),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ];
        let stdout = self.exec_checked(args, "", self.command_timeout).await?;

        let ids: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        match self.inspect(&ids).await {
            Ok(instances) => Ok(instances),
            // 列出后全部被删除
            Err(RuntimeError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn run(&self, spec: &RunSpec) -> RuntimeResult<ContainerInstance> {
        let stdout = self
            .exec_checked(build_run_args(spec), &spec.name, self.command_timeout)
            .await?;

        let id = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| RuntimeError::Parse("docker run printed no container id".to_string()))?
            .to_string();

        self.get(&id).await
    }

    async fn get(&self, id: &str) -> RuntimeResult<ContainerInstance> {
        self.inspect(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn restart(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let args = vec![
            "restart".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ];
        self.exec_checked(args, id, timeout + self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ];
        self.exec_checked(args, id, timeout + self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(id.to_string());
        self.exec_checked(args, id, self.command_timeout)
            .await
            .map(|_| ())
    }
}

/// 构建 `docker run` 参数
fn build_run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    if let Some(port) = spec.publish {
        // 只给出容器端口，宿主机端口由 docker 分配
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args.push(spec.image.clone());
    args
}

fn parse_inspect(stdout: &str) -> RuntimeResult<Vec<ContainerInstance>> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    Ok(entries.into_iter().map(ContainerInstance::from).collect())
}

fn classify_failure(command: &str, target: &str, stderr: &str) -> RuntimeError {
    let message = stderr.trim();
    if message.contains("No such container") || message.contains("No such object") {
        RuntimeError::NotFound(target.to_string())
    } else if message.contains("Cannot connect to the Docker daemon")
        || message.contains("Is the docker daemon running")
    {
        RuntimeError::Unavailable(message.to_string())
    } else {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }
}

fn describe(args: &[String]) -> String {
    match args.first() {
        Some(sub) => format!("docker {}", sub),
        None => "docker".to_string(),
    }
}
