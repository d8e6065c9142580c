//! 内存注册中心后端
//!
//! 进程内的协调服务实现，用于本地开发和测试。
//! 除了 `RegistryBackend` 接口外，还提供模拟提供者上下线、重复推送、
//! 乱序推送和会话断开的操作。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::discovery::backend::{ConsumerRecord, RegistryBackend, WatchEvent};
use crate::discovery::endpoint::Endpoint;
use crate::error::{ConsumerError, Result};

#[derive(Default)]
struct MemoryState {
    connected: bool,
    unreachable: bool,
    connect_delay: Option<Duration>,
    connect_count: usize,
    revision: i64,
    /// 服务名 -> (地址 -> 端点)
    providers: HashMap<String, BTreeMap<String, Endpoint>>,
    watchers: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
    consumers: Vec<ConsumerRecord>,
    rejected_services: Vec<String>,
}

/// 内存注册中心后端
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // 锁内不会 panic，中毒时直接沿用内部数据
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_connected(state: &MemoryState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(ConsumerError::RegistryUnavailable("memory session is not established".to_string()))
        }
    }

    fn snapshot_of(state: &MemoryState, service: &str) -> Vec<Endpoint> {
        state
            .providers
            .get(service)
            .map(|providers| providers.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn broadcast(&self, service: &str, event: WatchEvent) {
        let senders = self.state().watchers.get(service).cloned().unwrap_or_default();
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    /// 提供者上线（同一地址重复上线视为替换）
    pub async fn add_provider(&self, endpoint: Endpoint) {
        let service = endpoint.service_key.service.clone();
        let event = {
            let mut state = self.state();
            state
                .providers
                .entry(service.clone())
                .or_default()
                .insert(endpoint.address.clone(), endpoint);
            state.revision += 1;
            WatchEvent::Providers {
                revision: state.revision,
                providers: Self::snapshot_of(&state, &service),
            }
        };
        self.broadcast(&service, event).await;
    }

    /// 提供者上线但不推送通知（模拟丢失的通知）
    pub fn add_provider_silently(&self, endpoint: Endpoint) {
        let mut state = self.state();
        state
            .providers
            .entry(endpoint.service_key.service.clone())
            .or_default()
            .insert(endpoint.address.clone(), endpoint);
        state.revision += 1;
    }

    /// 提供者下线
    pub async fn remove_provider(&self, service: &str, address: &str) {
        let event = {
            let mut state = self.state();
            if let Some(providers) = state.providers.get_mut(service) {
                providers.remove(address);
            }
            state.revision += 1;
            WatchEvent::Providers {
                revision: state.revision,
                providers: Self::snapshot_of(&state, service),
            }
        };
        self.broadcast(service, event).await;
    }

    /// 以相同版本号再次推送当前列表
    pub async fn redeliver(&self, service: &str) {
        let event = {
            let state = self.state();
            WatchEvent::Providers {
                revision: state.revision,
                providers: Self::snapshot_of(&state, service),
            }
        };
        self.broadcast(service, event).await;
    }

    /// 直接推送任意通知（用于模拟乱序推送）
    pub async fn push_event(&self, service: &str, event: WatchEvent) {
        self.broadcast(service, event).await;
    }

    /// 模拟会话断开：所有 watch 收到 `SessionLost`
    pub async fn drop_session(&self, reason: &str) {
        let watchers: Vec<mpsc::Sender<WatchEvent>> = {
            let mut state = self.state();
            state.connected = false;
            state.watchers.drain().flat_map(|(_, senders)| senders).collect()
        };
        for sender in watchers {
            let _ = sender.send(WatchEvent::SessionLost(reason.to_string())).await;
        }
    }

    /// 设置协调服务是否可达（影响 `connect`）
    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    /// 设置建立会话前的延迟
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state().connect_delay = delay;
    }

    /// 拒绝某个服务的消费者注册
    pub fn reject_registration(&self, service: impl Into<String>) {
        self.state().rejected_services.push(service.into());
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_count(&self) -> usize {
        self.state().connect_count
    }

    pub fn consumers(&self) -> Vec<ConsumerRecord> {
        self.state().consumers.clone()
    }

    pub fn watcher_count(&self, service: &str) -> usize {
        self.state()
            .watchers
            .get(service)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        let delay = self.state().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.connect_count += 1;
        if state.unreachable {
            return Err(ConsumerError::connect("memory registry is unreachable"));
        }
        state.connected = true;
        Ok(())
    }

    async fn list_providers(&self, service: &str) -> Result<(i64, Vec<Endpoint>)> {
        let state = self.state();
        Self::ensure_connected(&state)?;
        Ok((state.revision, Self::snapshot_of(&state, service)))
    }

    async fn watch_providers(&self, service: &str, after_revision: i64) -> Result<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(100);
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        if state.revision > after_revision {
            // 新通道必然有空位
            let _ = tx.try_send(WatchEvent::Providers {
                revision: state.revision,
                providers: Self::snapshot_of(&state, service),
            });
        }
        state.watchers.entry(service.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn register_consumer(&self, record: &ConsumerRecord) -> Result<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        let service = &record.service_key.service;
        if state.rejected_services.iter().any(|s| s == service) {
            return Err(ConsumerError::registration(service.clone(), "rejected by registry"));
        }
        state.consumers.push(record.clone());
        Ok(())
    }

    async fn unregister_consumers(&self) -> Result<()> {
        self.state().consumers.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state();
        state.consumers.clear();
        state.watchers.clear();
        state.connected = false;
        info!("memory registry session closed");
        Ok(())
    }
}
