//! HTTP 健康探针
//!
//! 对 `http://localhost:<host_port><path>` 发起一次 GET，复用连接池

use reqwest::Client;
use std::time::Duration;

/// HTTP 探针
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    path: String,
}

impl HttpProbe {
    /// 创建探针
    ///
    /// # Arguments
    /// * `timeout` - 单次请求超时
    /// * `path` - 探测路径，默认 `/`
    pub fn new(timeout: Duration, path: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()?;

        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Ok(Self { client, path })
    }

    pub fn url(&self, host_port: u16) -> String {
        format!("http://localhost:{}{}", host_port, self.path)
    }

    /// 返回 HTTP 状态码；网络错误原样返回给调用者计为一次失败
    pub async fn get(&self, host_port: u16) -> Result<u16, reqwest::Error> {
        let response = self.client.get(self.url(host_port)).send().await?;
        Ok(response.status().as_u16())
    }
}
