//! 内存容器运行时，仅用于测试
//!
//! 记录所有调用，并支持按容器注入重启行为、阻塞重启以及列表/启动失败

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::env::constants::MANAGED_NAMESPACE;
use crate::domain::{labels, ContainerInstance, ContainerStatus, LabelFilter, RawPortMapping, RunSpec};

use super::runtime::{ContainerRuntime, RuntimeError, RuntimeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String),
    Run(String),
    Get(String),
    Restart(String),
    Stop(String),
    Remove(String),
}

/// 重启时的表现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartBehavior {
    /// 重启后进入 running
    Recover,
    /// 命令成功但容器仍未运行
    StayDown,
    /// 容器已消失
    NotFound,
    /// 运行时报错
    Error,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, ContainerInstance>,
    calls: Vec<Call>,
    seq: u64,
    restart: HashMap<String, RestartBehavior>,
    /// id -> 失败前允许成功的 get 次数
    get_fails: HashMap<String, usize>,
    remove_fails: HashSet<String>,
    run_error: Option<String>,
    run_status: Option<ContainerStatus>,
    run_host_port: Option<u16>,
}

#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
    list_fails: AtomicBool,
    /// 设置后，restart 会先通知 `restart_entered` 再等待该门闩
    restart_gate: Mutex<Option<Arc<Notify>>>,
    pub restart_entered: Notify,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// 添加一个托管实例，返回其 ID（`c1`, `c2`, ...）
    pub fn add(&self, app: &str, status: ContainerStatus) -> String {
        let mut labels = BTreeMap::new();
        labels.insert(labels::APP.to_string(), app.to_string());
        labels.insert(labels::MANAGED_BY.to_string(), MANAGED_NAMESPACE.to_string());
        self.insert(labels, status, RawPortMapping::Absent, format!("{}:old", app))
    }

    /// 添加一个带任意标签的实例
    pub fn add_with_labels(&self, labels: &[(&str, &str)], status: ContainerStatus) -> String {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.insert(labels, status, RawPortMapping::Absent, "unlabelled".to_string())
    }

    fn insert(
        &self,
        labels: BTreeMap<String, String>,
        status: ContainerStatus,
        ports: RawPortMapping,
        image: String,
    ) -> String {
        let mut inner = self.lock();
        inner.seq += 1;
        let id = format!("c{}", inner.seq);
        inner.containers.insert(
            id.clone(),
            ContainerInstance {
                id: id.clone(),
                name: id.clone(),
                image,
                status,
                labels,
                env: BTreeMap::new(),
                ports,
            },
        );
        id
    }

    /// 写入实例环境变量（模拟镜像自带的 env）
    pub fn set_env(&self, id: &str, env: &[(&str, &str)]) {
        if let Some(instance) = self.lock().containers.get_mut(id) {
            instance
                .env
                .extend(env.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        }
    }

    pub fn set_restart(&self, id: &str, behavior: RestartBehavior) {
        self.lock().restart.insert(id.to_string(), behavior);
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.list_fails.store(fails, Ordering::SeqCst);
    }

    /// 前 `allow` 次 get 成功，之后对该 ID 的 get 都失败
    pub fn fail_get_after(&self, id: &str, allow: usize) {
        self.lock().get_fails.insert(id.to_string(), allow);
    }

    pub fn fail_remove(&self, id: &str) {
        self.lock().remove_fails.insert(id.to_string());
    }

    pub fn set_run_error(&self, error: &str) {
        self.lock().run_error = Some(error.to_string());
    }

    /// 新启动实例的状态，默认 running
    pub fn set_run_status(&self, status: ContainerStatus) {
        self.lock().run_status = Some(status);
    }

    /// 新启动实例分配到的宿主机端口
    pub fn set_run_host_port(&self, port: u16) {
        self.lock().run_host_port = Some(port);
    }

    pub fn gate_restarts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.restart_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(*c)).count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Run(_) | Call::Restart(_) | Call::Stop(_) | Call::Remove(_)))
    }

    pub fn status_of(&self, id: &str) -> Option<ContainerStatus> {
        self.lock().containers.get(id).map(|c| c.status)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().containers.contains_key(id)
    }

    pub fn instance(&self, id: &str) -> Option<ContainerInstance> {
        self.lock().containers.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, filter: &LabelFilter) -> RuntimeResult<Vec<ContainerInstance>> {
        self.record(Call::List(filter.to_string()));
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("fake runtime is down".to_string()));
        }
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|c| filter.matches(&c.labels))
            .cloned()
            .collect())
    }

    async fn run(&self, spec: &RunSpec) -> RuntimeResult<ContainerInstance> {
        self.record(Call::Run(spec.image.clone()));
        let (error, status, host_port) = {
            let inner = self.lock();
            (inner.run_error.clone(), inner.run_status, inner.run_host_port)
        };
        if let Some(message) = error {
            return Err(RuntimeError::CommandFailed {
                command: "docker run".to_string(),
                message,
            });
        }

        let ports = match spec.publish {
            Some(port) => RawPortMapping::from_value(&json!({
                format!("{}/tcp", port): [{"HostIp": "0.0.0.0", "HostPort": host_port.unwrap_or(49153).to_string()}]
            })),
            None => RawPortMapping::Absent,
        };
        let id = self.insert(
            spec.labels.clone(),
            status.unwrap_or(ContainerStatus::Running),
            ports,
            spec.image.clone(),
        );

        let mut inner = self.lock();
        let instance = inner
            .containers
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        instance.name = spec.name.clone();
        instance.env = spec.env.clone();
        Ok(instance.clone())
    }

    async fn get(&self, id: &str) -> RuntimeResult<ContainerInstance> {
        self.record(Call::Get(id.to_string()));
        let mut inner = self.lock();
        if let Some(allow) = inner.get_fails.get_mut(id) {
            if *allow == 0 {
                return Err(RuntimeError::CommandFailed {
                    command: "docker inspect".to_string(),
                    message: "injected failure".to_string(),
                });
            }
            *allow -= 1;
        }
        inner
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        self.record(Call::Restart(id.to_string()));

        let gate = self.restart_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.restart_entered.notify_one();
            gate.notified().await;
        }

        let mut inner = self.lock();
        let behavior = inner
            .restart
            .get(id)
            .copied()
            .unwrap_or(RestartBehavior::Recover);
        match behavior {
            RestartBehavior::NotFound => Err(RuntimeError::NotFound(id.to_string())),
            RestartBehavior::Error => Err(RuntimeError::CommandFailed {
                command: "docker restart".to_string(),
                message: "injected failure".to_string(),
            }),
            RestartBehavior::StayDown => {
                if inner.containers.contains_key(id) {
                    Ok(())
                } else {
                    Err(RuntimeError::NotFound(id.to_string()))
                }
            }
            RestartBehavior::Recover => match inner.containers.get_mut(id) {
                Some(c) => {
                    c.status = ContainerStatus::Running;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(id.to_string())),
            },
        }
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        self.record(Call::Stop(id.to_string()));
        match self.lock().containers.get_mut(id) {
            Some(c) => {
                c.status = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str, _force: bool) -> RuntimeResult<()> {
        self.record(Call::Remove(id.to_string()));
        let mut inner = self.lock();
        if inner.remove_fails.contains(id) {
            return Err(RuntimeError::CommandFailed {
                command: "docker rm".to_string(),
                message: "injected failure".to_string(),
            });
        }
        inner
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

/// 在 127.0.0.1 上启动一个对所有请求返回固定状态码的 HTTP 服务，返回其端口
pub async fn spawn_status_server(status: u16) -> u16 {
    use axum::{http::StatusCode, Router};

    let code = StatusCode::from_u16(status).unwrap();
    let app = Router::new().fallback(move || async move { code });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}
