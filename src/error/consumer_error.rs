//! 消费端统一错误类型

use super::code::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// 消费端统一错误类型
///
/// 启动阶段的 `Config` / `Connect` / `Registration` 是致命错误，由运行时映射为进程退出；
/// 其余错误都是单次调用级别的错误，原样返回给调用方，不做自动重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// 配置错误（仅在启动时出现）
    #[error("配置错误: {0}")]
    Config(String),

    /// 注册中心会话无法建立
    #[error("注册中心连接失败: {0}")]
    Connect(String),

    /// 注册中心会话丢失且重连次数耗尽
    #[error("注册中心不可用: {0}")]
    RegistryUnavailable(String),

    /// 注册中心已关闭
    #[error("注册中心已关闭")]
    RegistryClosed,

    /// 服务注册失败
    #[error("服务注册失败 [{service}]: {reason}")]
    Registration { service: String, reason: String },

    /// 没有可用的服务端点
    #[error("没有可用的服务端点: {0}")]
    NoAvailableEndpoint(String),

    /// 服务未配置或协议不支持
    #[error("不支持的协议: {0}")]
    UnsupportedProtocol(String),

    /// 连接或传输失败
    #[error("请求发送失败 [{endpoint}]: {reason}")]
    Dispatch { endpoint: String, reason: String },

    /// 请求超时
    #[error("请求超时 [{endpoint}]: 超过 {timeout:?}")]
    TimedOut { endpoint: String, timeout: Duration },

    /// 响应解码失败
    #[error("响应解码失败: {0}")]
    Decode(String),

    /// 服务端返回的错误
    #[error("远端错误 [{code}]: {message}")]
    Remote { code: i64, message: String },
}

impl ConsumerError {
    pub fn config(reason: impl Into<String>) -> Self {
        ConsumerError::Config(reason.into())
    }

    pub fn connect(reason: impl Into<String>) -> Self {
        ConsumerError::Connect(reason.into())
    }

    pub fn registration(service: impl Into<String>, reason: impl Into<String>) -> Self {
        ConsumerError::Registration {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn dispatch(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        ConsumerError::Dispatch {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        ConsumerError::Decode(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsumerError::Config(_) => ErrorCode::ConfigurationError,
            ConsumerError::Connect(_) => ErrorCode::RegistryConnectFailed,
            ConsumerError::RegistryUnavailable(_) => ErrorCode::RegistryUnavailable,
            ConsumerError::RegistryClosed => ErrorCode::RegistryClosed,
            ConsumerError::Registration { .. } => ErrorCode::RegistrationFailed,
            ConsumerError::NoAvailableEndpoint(_) => ErrorCode::NoAvailableEndpoint,
            ConsumerError::UnsupportedProtocol(_) => ErrorCode::ProtocolNotSupported,
            ConsumerError::Dispatch { .. } => ErrorCode::NetworkError,
            ConsumerError::TimedOut { .. } => ErrorCode::NetworkTimeout,
            ConsumerError::Decode(_) => ErrorCode::DeserializationError,
            ConsumerError::Remote { .. } => ErrorCode::RemoteError,
        }
    }

    /// 是否为启动阶段的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsumerError::Config(_) | ConsumerError::Connect(_) | ConsumerError::Registration { .. }
        )
    }

    /// 指标标签使用的结果名
    pub fn outcome(&self) -> &'static str {
        match self {
            ConsumerError::TimedOut { .. } => "timed_out",
            ConsumerError::Decode(_) => "decode_error",
            ConsumerError::Remote { .. } => "remote_error",
            ConsumerError::NoAvailableEndpoint(_) => "no_endpoint",
            ConsumerError::Dispatch { .. } => "dispatch_error",
            _ => "failed",
        }
    }
}

impl From<serde_json::Error> for ConsumerError {
    fn from(err: serde_json::Error) -> Self {
        ConsumerError::decode(format!("JSON 解码错误: {}", err))
    }
}

/// 消费端结果类型
pub type Result<T> = std::result::Result<T, ConsumerError>;
