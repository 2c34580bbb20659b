//! 环境变量配置加载

use std::env;
use std::time::Duration;
use tracing::warn;

use self::constants::*;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 状态 API 监听端口
    pub port: u16,
    /// docker 可执行文件
    pub docker_bin: String,
    /// 单条 docker 命令的超时
    pub docker_timeout: Duration,
    /// 是否在 serve 模式下运行自愈守护进程
    pub healer_enabled: bool,
    /// 自愈扫描间隔
    pub heal_interval: Duration,
    /// 部署后健康检查配置
    pub health_check: HealthCheckConfig,
}

/// 健康检查配置
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    /// 总超时
    pub timeout: Duration,
    /// 轮询间隔
    pub interval: Duration,
    /// 单次 HTTP 探测超时
    pub probe_timeout: Duration,
    /// 探测路径
    pub probe_path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS),
            interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            probe_path: "/".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: load_secs("HEALTH_CHECK_TIMEOUT_SECS").unwrap_or(defaults.timeout),
            interval: load_secs("HEALTH_CHECK_INTERVAL_SECS").unwrap_or(defaults.interval),
            probe_timeout: defaults.probe_timeout,
            probe_path: env::var("HEALTH_CHECK_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.probe_path),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            docker_bin: "docker".to_string(),
            docker_timeout: Duration::from_secs(DOCKER_COMMAND_TIMEOUT_SECS),
            healer_enabled: true,
            heal_interval: Duration::from_secs(HEAL_INTERVAL_SECS),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let docker_bin = env::var("DOCKER_BIN")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.docker_bin);

        let docker_timeout = load_secs("DOCKER_TIMEOUT_SECS").unwrap_or(defaults.docker_timeout);

        let healer_enabled = env::var("HEALER_ENABLED")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.healer_enabled);

        let heal_interval = load_secs("HEAL_INTERVAL_SECS").unwrap_or(defaults.heal_interval);

        Self {
            port,
            docker_bin,
            docker_timeout,
            healer_enabled,
            heal_interval,
            health_check: HealthCheckConfig::from_env(),
        }
    }
}

/// 读取以秒为单位的时长，0 或无法解析时忽略
fn load_secs(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring invalid duration");
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

/// 常量
pub mod constants {
    /// 本系统托管容器的命名空间（`managed_by` 标签值）
    pub const MANAGED_NAMESPACE: &str = "paas-agent";

    /// 默认状态 API 端口
    pub const DEFAULT_PORT: u16 = 9876;

    /// 自愈扫描间隔（秒）
    pub const HEAL_INTERVAL_SECS: u64 = 10;

    /// 部署健康检查超时（秒）
    pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 30;

    /// 部署健康检查轮询间隔（秒）
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 2;

    /// 单次 HTTP 探测超时（秒）
    pub const PROBE_TIMEOUT_SECS: u64 = 2;

    /// 单条 docker 命令超时（秒），包含拉取镜像的时间
    pub const DOCKER_COMMAND_TIMEOUT_SECS: u64 = 300;

    /// 回滚时停止新实例的宽限期（秒）
    pub const ROLLBACK_STOP_GRACE_SECS: u64 = 5;

    /// 清理旧实例的宽限期（秒）
    pub const CLEANUP_STOP_GRACE_SECS: u64 = 10;

    /// 自愈重启超时（秒）
    pub const HEAL_RESTART_TIMEOUT_SECS: u64 = 10;

    /// 重启后等待容器启动的时间（秒）
    pub const HEAL_GRACE_SECS: u64 = 2;

    /// 自愈重新部署前停止旧实例的宽限期（秒）
    pub const HEAL_STOP_GRACE_SECS: u64 = 5;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
