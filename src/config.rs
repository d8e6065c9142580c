//! 消费端配置
//!
//! 配置文件支持 YAML（`.yml` / `.yaml`）和 TOML（`.toml`）两种格式，
//! 路径由环境变量 `APP_CONF_FILE` 指定。所有时长字段在加载时解析一次，
//! 任何解析或校验失败都是致命错误，进程不会带着残缺配置启动。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::CodecType;
use crate::error::{ConsumerError, Result};
use crate::registry::LoadBalanceStrategy;
use crate::types::{ApplicationInfo, ServiceKey};

/// 配置文件路径环境变量
pub const APP_CONF_FILE: &str = "APP_CONF_FILE";

/// 配置文件的原始形式（时长仍为字符串）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawClientConfig {
    #[serde(default)]
    pub pprof_enabled: bool,
    #[serde(default = "default_pprof_port")]
    pub pprof_port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_selector")]
    pub selector: String,
    #[serde(default = "default_selector_ttl")]
    pub selector_ttl: String,
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(default)]
    pub application_config: ApplicationInfo,
    #[serde(default)]
    pub registry_config: RawRegistryConfig,
    #[serde(default)]
    pub service_list: Vec<ServiceKey>,

    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_force_exit_timeout")]
    pub force_exit_timeout: String,
}

/// 注册中心连接参数（原始形式）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRegistryConfig {
    #[serde(default)]
    pub address: Vec<String>,
    #[serde(default = "default_registry_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_registry_root")]
    pub root: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: usize,
    #[serde(default = "default_consumer_ttl")]
    pub consumer_ttl: String,
}

impl Default for RawRegistryConfig {
    fn default() -> Self {
        Self {
            address: Vec::new(),
            timeout: default_registry_timeout(),
            username: None,
            password: None,
            root: default_registry_root(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            consumer_ttl: default_consumer_ttl(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// 日志文件路径，缺省输出到 stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 注册中心后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Etcd,
    Memory,
}

impl std::str::FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(RegistryKind::Etcd),
            "memory" | "mem" => Ok(RegistryKind::Memory),
            _ => Err(format!("Unknown registry type: {}", s)),
        }
    }
}

/// 注册中心连接参数
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub address: Vec<String>,
    /// 会话建立超时
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 注册中心根路径
    pub root: String,
    /// 会话丢失后的最大重连次数
    pub max_reconnect_attempts: usize,
    /// 消费者记录的租约 TTL
    pub consumer_ttl: Duration,
}

/// 校验后的消费端配置，初始化完成后只读
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub pprof_enabled: bool,
    pub pprof_port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub selector: LoadBalanceStrategy,
    /// 提供者列表全量刷新间隔
    pub selector_ttl: Duration,
    pub registry: RegistryKind,
    pub application: ApplicationInfo,
    pub registry_config: RegistryConfig,
    pub service_list: Vec<ServiceKey>,
    pub log: LogConfig,
    pub force_exit_timeout: Duration,
}

impl ClientConfig {
    /// 从 `APP_CONF_FILE` 指定的文件加载
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(APP_CONF_FILE).map_err(|_| {
            ConsumerError::config(format!("environment variable {} is not set", APP_CONF_FILE))
        })?;
        Self::load_from_file(path)
    }

    /// 从文件加载，按扩展名选择格式
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConsumerError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(ConsumerError::config(format!(
                "configure file {} must end with .yml, .yaml or .toml",
                path.display()
            ))),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawClientConfig = serde_yaml::from_str(content)
            .map_err(|e| ConsumerError::config(format!("invalid yaml: {}", e)))?;
        Self::validate(raw)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawClientConfig = toml::from_str(content)
            .map_err(|e| ConsumerError::config(format!("invalid toml: {}", e)))?;
        Self::validate(raw)
    }

    /// 校验原始配置并预解析所有时长
    pub fn validate(raw: RawClientConfig) -> Result<Self> {
        let connect_timeout = parse_duration("connect_timeout", &raw.connect_timeout)?;
        let request_timeout = parse_duration("request_timeout", &raw.request_timeout)?;
        let selector_ttl = parse_duration("selector_ttl", &raw.selector_ttl)?;
        let force_exit_timeout = parse_duration("force_exit_timeout", &raw.force_exit_timeout)?;
        let registry_timeout = parse_duration("registry_config.timeout", &raw.registry_config.timeout)?;
        let consumer_ttl = parse_duration("registry_config.consumer_ttl", &raw.registry_config.consumer_ttl)?;

        let selector = raw
            .selector
            .parse::<LoadBalanceStrategy>()
            .map_err(ConsumerError::config)?;
        let registry = raw.registry.parse::<RegistryKind>().map_err(ConsumerError::config)?;

        if registry == RegistryKind::Etcd && raw.registry_config.address.is_empty() {
            return Err(ConsumerError::config("registry_config.address must not be empty"));
        }

        if raw.service_list.is_empty() {
            return Err(ConsumerError::config("service_list must not be empty"));
        }
        for service in &raw.service_list {
            if service.service.trim().is_empty() {
                return Err(ConsumerError::config("service name must not be empty"));
            }
            if service.protocol.parse::<CodecType>().is_err() {
                return Err(ConsumerError::config(format!(
                    "unknown protocol {} for service {}",
                    service.protocol, service.service
                )));
            }
        }

        Ok(Self {
            pprof_enabled: raw.pprof_enabled,
            pprof_port: raw.pprof_port,
            connect_timeout,
            request_timeout,
            selector,
            selector_ttl,
            registry,
            application: raw.application_config,
            registry_config: RegistryConfig {
                address: raw.registry_config.address,
                timeout: registry_timeout,
                username: raw.registry_config.username,
                password: raw.registry_config.password,
                root: raw.registry_config.root,
                max_reconnect_attempts: raw.registry_config.max_reconnect_attempts,
                consumer_ttl,
            },
            service_list: raw.service_list,
            log: raw.log,
            force_exit_timeout,
        })
    }

    /// 按服务名查找配置的服务；同名多条时优先选择有编解码器支持的协议
    pub fn find_service(&self, service: &str) -> Option<&ServiceKey> {
        let mut candidates = self.service_list.iter().filter(|key| key.service == service);
        let first = candidates.next()?;
        if first.protocol.parse::<CodecType>().is_ok() {
            return Some(first);
        }
        candidates
            .find(|key| key.protocol.parse::<CodecType>().is_ok())
            .or(Some(first))
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| {
        ConsumerError::config(format!("invalid duration for {} ({:?}): {}", field, value, e))
    })?;
    if duration.is_zero() {
        return Err(ConsumerError::config(format!("{} must be greater than zero", field)));
    }
    Ok(duration)
}

fn default_pprof_port() -> u16 {
    10086
}

fn default_connect_timeout() -> String {
    "100ms".to_string()
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn default_selector() -> String {
    "cache".to_string()
}

fn default_selector_ttl() -> String {
    "10m".to_string()
}

fn default_registry() -> String {
    "etcd".to_string()
}

fn default_registry_timeout() -> String {
    "3s".to_string()
}

fn default_registry_root() -> String {
    "/dubbo".to_string()
}

fn default_max_reconnect_attempts() -> usize {
    5
}

fn default_consumer_ttl() -> String {
    "300s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_force_exit_timeout() -> String {
    "10s".to_string()
}
