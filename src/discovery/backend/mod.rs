//! 注册中心后端抽象和实现

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{RegistryConfig, RegistryKind};
use crate::discovery::endpoint::Endpoint;
use crate::error::Result;
use crate::types::{ApplicationInfo, ServiceKey};

pub use memory::MemoryBackend;

/// 提供者列表变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// 某个服务当前完整的提供者列表，附带注册中心的版本号
    Providers { revision: i64, providers: Vec<Endpoint> },
    /// 会话丢失，之后不会再有通知
    SessionLost(String),
}

/// 消费者记录，注册到注册中心用于声明对某个服务的订阅
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub consumer_id: String,
    pub service_key: ServiceKey,
    pub application: ApplicationInfo,
    pub registered_at: DateTime<Utc>,
}

impl ConsumerRecord {
    pub fn new(consumer_id: impl Into<String>, service_key: ServiceKey, application: ApplicationInfo) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            service_key,
            application,
            registered_at: Utc::now(),
        }
    }
}

/// 注册中心后端 trait
///
/// 所有协调服务后端（etcd、内存）都需要实现这个 trait。
/// 提供者按服务名组织，group / version / protocol 的过滤由注册中心客户端完成。
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 后端名称（用于日志）
    fn name(&self) -> &'static str;

    /// 建立（或重新建立）会话
    async fn connect(&self) -> Result<()>;

    /// 列出某个服务当前的全部提供者，返回 (版本号, 提供者列表)
    async fn list_providers(&self, service: &str) -> Result<(i64, Vec<Endpoint>)>;

    /// 从 `after_revision` 之后开始监听某个服务的提供者变化
    ///
    /// 每次变化推送一次完整列表；`list_providers` 和建立监听之间发生的变化也会推送。
    /// 会话断开（包括租约失效）时推送 `SessionLost` 后关闭通道。
    async fn watch_providers(&self, service: &str, after_revision: i64) -> Result<mpsc::Receiver<WatchEvent>>;

    /// 注册消费者记录
    async fn register_consumer(&self, record: &ConsumerRecord) -> Result<()>;

    /// 注销本进程注册的所有消费者记录
    async fn unregister_consumers(&self) -> Result<()>;

    /// 关闭会话
    async fn close(&self) -> Result<()>;
}

/// 根据配置创建注册中心后端
pub fn create_backend(kind: RegistryKind, config: &RegistryConfig) -> Result<Arc<dyn RegistryBackend>> {
    match kind {
        #[cfg(feature = "etcd")]
        RegistryKind::Etcd => Ok(Arc::new(etcd::EtcdBackend::new(config.clone()))),
        #[cfg(not(feature = "etcd"))]
        RegistryKind::Etcd => {
            let _ = config;
            Err(crate::error::ConsumerError::config("etcd registry support is not compiled in"))
        }
        RegistryKind::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

/// 注册中心中某个服务的提供者目录
pub(crate) fn providers_prefix(root: &str, service: &str) -> String {
    format!("{}/{}/providers/", root.trim_end_matches('/'), service)
}

/// 注册中心中某个服务的消费者目录
pub(crate) fn consumers_prefix(root: &str, service: &str) -> String {
    format!("{}/{}/consumers/", root.trim_end_matches('/'), service)
}
