//! 运行时配置模块

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ClientConfig;

/// 运行时配置
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 强制退出期限（默认 10 秒）：超过后放弃有序关闭
    pub force_exit_timeout: Duration,
    /// 诊断端点地址，`None` 表示不启动
    pub diagnostics_addr: Option<SocketAddr>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            force_exit_timeout: Duration::from_secs(10),
            diagnostics_addr: None,
        }
    }
}

impl RuntimeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置强制退出期限
    pub fn with_force_exit_timeout(mut self, timeout: Duration) -> Self {
        self.force_exit_timeout = timeout;
        self
    }

    /// 设置诊断端点地址
    pub fn with_diagnostics_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.diagnostics_addr = addr;
        self
    }
}

impl From<&ClientConfig> for RuntimeConfig {
    fn from(config: &ClientConfig) -> Self {
        let diagnostics_addr = config
            .pprof_enabled
            .then(|| SocketAddr::from(([0, 0, 0, 0], config.pprof_port)));
        Self {
            force_exit_timeout: config.force_exit_timeout,
            diagnostics_addr,
        }
    }
}
