//! 消费端上下文
//!
//! 启动时构造一次，之后以 `Arc<ConsumerContext>` 显式传递给调用方，
//! 不使用进程级全局变量。

use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::codec::CodecRegistry;
use crate::config::ClientConfig;
use crate::metrics::MetricsCollector;
use crate::registry::RegistryClient;

/// 消费端上下文
pub struct ConsumerContext {
    config: Arc<ClientConfig>,
    registry: RegistryClient,
    codecs: CodecRegistry,
    metrics: MetricsCollector,
    inflight: TaskTracker,
}

impl ConsumerContext {
    pub fn new(
        config: Arc<ClientConfig>,
        registry: RegistryClient,
        codecs: CodecRegistry,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            config,
            registry,
            codecs,
            metrics,
            inflight: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// 进行中的调用，关闭时等待它们结束
    pub fn inflight(&self) -> &TaskTracker {
        &self.inflight
    }
}
