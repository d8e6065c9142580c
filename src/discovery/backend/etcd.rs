//! etcd 注册中心后端
//!
//! 键布局：
//! - 提供者：`{root}/{service}/providers/{address}`，值为 `Endpoint` 的 JSON
//! - 消费者：`{root}/{service}/consumers/{consumer_id}`，绑定到本进程的租约

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, KeyValue, PutOptions, WatchOptions};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::discovery::backend::{
    consumers_prefix, providers_prefix, ConsumerRecord, RegistryBackend, WatchEvent,
};
use crate::discovery::endpoint::Endpoint;
use crate::error::{ConsumerError, Result};

/// 本进程持有的租约
struct LeaseState {
    lease_id: i64,
    keep_alive_handle: tokio::task::JoinHandle<()>,
}

/// etcd 注册中心后端
///
/// 每次 `connect` 开启一个新会话，会话令牌在租约续约失败时取消，
/// 该会话下的所有 watch 随之推送 `SessionLost`。
pub struct EtcdBackend {
    config: RegistryConfig,
    client: RwLock<Option<Client>>,
    lease: Mutex<Option<LeaseState>>,
    consumer_keys: Mutex<Vec<String>>,
    session: std::sync::Mutex<CancellationToken>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl EtcdBackend {
    /// 创建新的 etcd 后端（不会立即连接）
    pub fn new(config: RegistryConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            config,
            client: RwLock::new(None),
            lease: Mutex::new(None),
            consumer_keys: Mutex::new(Vec::new()),
            session: std::sync::Mutex::new(shutdown.child_token()),
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| ConsumerError::connect("etcd session is not established"))
    }

    fn session(&self) -> CancellationToken {
        self.session.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 开启新会话，旧会话下的 watch 全部结束
    fn renew_session(&self) {
        let next = self.shutdown.child_token();
        let previous = std::mem::replace(&mut *self.session.lock().unwrap_or_else(|p| p.into_inner()), next);
        previous.cancel();
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(self.config.timeout)
            .with_timeout(self.config.timeout);
        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            options = options.with_user(user.clone(), password.clone());
        }
        options
    }

    /// 获取（必要时申请）本进程的租约
    async fn ensure_lease(&self) -> Result<i64> {
        let mut lease = self.lease.lock().await;
        if let Some(state) = lease.as_ref() {
            return Ok(state.lease_id);
        }

        let mut client = self.client().await?;
        let ttl = self.config.consumer_ttl.as_secs().max(1) as i64;
        let grant = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| ConsumerError::connect(format!("Failed to grant lease: {}", e)))?;
        let lease_id = grant.id();

        let keep_alive_handle = self.start_keep_alive(client, lease_id);
        *lease = Some(LeaseState {
            lease_id,
            keep_alive_handle,
        });
        Ok(lease_id)
    }

    /// 后台续约；续约失败或租约过期时取消当前会话
    fn start_keep_alive(&self, mut client: Client, lease_id: i64) -> tokio::task::JoinHandle<()> {
        let interval = (self.config.consumer_ttl / 3).max(Duration::from_secs(1));
        let session = self.session();

        self.tasks.spawn(async move {
            let reason = match client.lease_keep_alive(lease_id).await {
                Err(e) => format!("lease keep-alive failed: {}", e),
                Ok((mut keeper, mut stream)) => loop {
                    tokio::select! {
                        _ = session.cancelled() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }

                    if let Err(e) = keeper.keep_alive().await {
                        break format!("lease keep-alive request failed: {}", e);
                    }
                    match stream.message().await {
                        Ok(Some(resp)) if resp.ttl() > 0 => {
                            debug!(lease_id, ttl = resp.ttl(), "Lease keep-alive successful");
                        }
                        Ok(Some(_)) => break format!("lease {} expired", lease_id),
                        Ok(None) => break "lease keep-alive stream closed".to_string(),
                        Err(e) => break format!("lease keep-alive stream error: {}", e),
                    }
                },
            };

            error!(lease_id, reason = %reason, "❌ etcd lease lost");
            session.cancel();
        })
    }

    async fn fetch_providers(client: &mut Client, prefix: &str) -> Result<(i64, Vec<Endpoint>)> {
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| ConsumerError::RegistryUnavailable(format!("etcd get {}: {}", prefix, e)))?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok((revision, parse_providers(resp.kvs())))
    }
}

/// 解析提供者记录，格式错误的记录会被跳过
fn parse_providers(kvs: &[KeyValue]) -> Vec<Endpoint> {
    kvs.iter()
        .filter_map(|kv| match serde_json::from_slice::<Endpoint>(kv.value()) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(
                    key = %String::from_utf8_lossy(kv.key()),
                    error = %e,
                    "Skipping malformed provider record"
                );
                None
            }
        })
        .collect()
}

#[async_trait]
impl RegistryBackend for EtcdBackend {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn connect(&self) -> Result<()> {
        let client = Client::connect(&self.config.address, Some(self.connect_options()))
            .await
            .map_err(|e| ConsumerError::connect(format!("Failed to connect to etcd: {}", e)))?;

        // 旧会话的租约随会话一起失效
        if let Some(state) = self.lease.lock().await.take() {
            state.keep_alive_handle.abort();
        }
        self.renew_session();
        *self.client.write().await = Some(client);

        info!(endpoints = ?self.config.address, "Connected to etcd");
        Ok(())
    }

    async fn list_providers(&self, service: &str) -> Result<(i64, Vec<Endpoint>)> {
        let mut client = self.client().await?;
        let prefix = providers_prefix(&self.config.root, service);
        Self::fetch_providers(&mut client, &prefix).await
    }

    async fn watch_providers(&self, service: &str, after_revision: i64) -> Result<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(100);
        let mut client = self.client().await?;
        let prefix = providers_prefix(&self.config.root, service);

        let mut options = WatchOptions::new().with_prefix();
        if after_revision > 0 {
            // 从列表版本之后开始，列表和监听之间的变化会作为首批事件到达
            options = options.with_start_revision(after_revision + 1);
        }
        let (mut watcher, mut stream) = client
            .watch(prefix.clone(), Some(options))
            .await
            .map_err(|e| ConsumerError::RegistryUnavailable(format!("etcd watch {}: {}", prefix, e)))?;

        let session = self.session();
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let reason = loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        let _ = watcher.cancel().await;
                        return;
                    }
                    _ = session.cancelled() => break format!("etcd session lost while watching {}", prefix),
                    message = stream.message() => message,
                };
                match message {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            break format!("watch on {} canceled by server", prefix);
                        }
                        if resp.events().is_empty() {
                            continue;
                        }
                        // 每次变化都重新拉取完整列表，保证推送的是一致的全量视图
                        let event = match Self::fetch_providers(&mut client, &prefix).await {
                            Ok((revision, providers)) => WatchEvent::Providers { revision, providers },
                            Err(e) => break e.to_string(),
                        };
                        if tx.send(event).await.is_err() {
                            let _ = watcher.cancel().await;
                            return;
                        }
                    }
                    Ok(None) => break format!("watch stream on {} closed", prefix),
                    Err(e) => break format!("watch stream on {} failed: {}", prefix, e),
                }
            };

            warn!(reason = %reason, "etcd watch terminated");
            let _ = watcher.cancel().await;
            let _ = tx.send(WatchEvent::SessionLost(reason)).await;
        });

        Ok(rx)
    }

    async fn register_consumer(&self, record: &ConsumerRecord) -> Result<()> {
        let service = &record.service_key.service;
        let lease_id = self
            .ensure_lease()
            .await
            .map_err(|e| ConsumerError::registration(service.clone(), e.to_string()))?;

        let key = format!(
            "{}{}",
            consumers_prefix(&self.config.root, service),
            record.consumer_id
        );
        let value = serde_json::to_vec(record)
            .map_err(|e| ConsumerError::registration(service.clone(), e.to_string()))?;

        let mut client = self.client().await?;
        client
            .put(key.clone(), value, Some(PutOptions::new().with_lease(lease_id)))
            .await
            .map_err(|e| ConsumerError::registration(service.clone(), e.to_string()))?;

        self.consumer_keys.lock().await.push(key);
        info!(service = %record.service_key, lease_id, "Consumer registered");
        Ok(())
    }

    async fn unregister_consumers(&self) -> Result<()> {
        let keys = std::mem::take(&mut *self.consumer_keys.lock().await);
        let lease = self.lease.lock().await.take();
        let Ok(mut client) = self.client().await else {
            return Ok(());
        };

        for key in keys {
            if let Err(e) = client.delete(key.clone(), None).await {
                warn!(key = %key, error = %e, "Failed to delete consumer record");
            }
        }
        if let Some(state) = lease {
            state.keep_alive_handle.abort();
            if let Err(e) = client.lease_revoke(state.lease_id).await {
                warn!(lease_id = state.lease_id, error = %e, "Failed to revoke lease");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.unregister_consumers().await?;
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.client.write().await.take();
        info!("etcd session closed");
        Ok(())
    }
}
