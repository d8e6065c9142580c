//! 注册中心客户端
//!
//! 负责和协调服务之间的会话：
//! - 建立会话（超时受 `registry_config.timeout` 约束）
//! - 注册消费者并订阅提供者列表变化，把变化写入端点目录
//! - `resolve`：目录快照 + 负载均衡
//! - 会话丢失后保持旧数据可用，后台按指数退避重连，重连次数耗尽后进入不可用状态
//! - `close`：释放会话，只执行一次

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::discovery::{ConsumerRecord, Endpoint, EndpointDirectory, RegistryBackend, WatchEvent};
use crate::error::{ConsumerError, Result};
use crate::invoker::RequestDescriptor;
use crate::registry::load_balancer::LoadBalancer;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::types::{ApplicationInfo, ServiceKey};

/// 注册中心会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// 会话正常
    Connected = 0,
    /// 会话丢失，正在重连，继续使用旧的端点数据
    Stale = 1,
    /// 重连次数耗尽
    Unavailable = 2,
    /// 已关闭
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connected,
            1 => SessionState::Stale,
            2 => SessionState::Unavailable,
            _ => SessionState::Closed,
        }
    }
}

/// 注册中心客户端
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn RegistryBackend>,
    directory: Arc<EndpointDirectory>,
    balancer: LoadBalancer,
    application: ApplicationInfo,
    consumer_id: String,
    session_timeout: Duration,
    resync_interval: Duration,
    reconnect_policy: ExponentialBackoffPolicy,
    /// 已声明订阅的服务
    services: RwLock<Vec<ServiceKey>>,
    /// 服务名 -> 最近一次应用的版本号
    revisions: DashMap<String, i64>,
    /// 正在监听的服务名
    watching: DashMap<String, ()>,
    state: AtomicU8,
    /// 当前会话的令牌，会话丢失时取消，该会话下的 watch 任务全部退出
    session: Mutex<CancellationToken>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RegistryClient {
    /// 建立注册中心会话
    ///
    /// 会话在 `registry_config.timeout` 内无法建立时返回 `Connect` 错误。
    pub async fn connect(config: &ClientConfig, backend: Arc<dyn RegistryBackend>) -> Result<Self> {
        let timeout = config.registry_config.timeout;
        info!(backend = backend.name(), timeout = ?timeout, "Connecting to registry...");

        match tokio::time::timeout(timeout, backend.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e @ ConsumerError::Connect(_))) => return Err(e),
            Ok(Err(e)) => return Err(ConsumerError::connect(e.to_string())),
            Err(_) => {
                return Err(ConsumerError::connect(format!(
                    "{} session not established within {:?}",
                    backend.name(),
                    timeout
                )))
            }
        }

        let app_name = if config.application.name.is_empty() {
            "consumer"
        } else {
            config.application.name.as_str()
        };
        let consumer_id = format!("{}-{}", app_name, uuid::Uuid::new_v4());
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            backend,
            directory: Arc::new(EndpointDirectory::new()),
            balancer: LoadBalancer::new(config.selector),
            application: config.application.clone(),
            consumer_id,
            session_timeout: timeout,
            resync_interval: config.selector_ttl,
            reconnect_policy: ExponentialBackoffPolicy::new(
                config.registry_config.max_reconnect_attempts,
                Duration::from_millis(500),
                Duration::from_secs(10),
            ),
            services: RwLock::new(Vec::new()),
            revisions: DashMap::new(),
            watching: DashMap::new(),
            state: AtomicU8::new(SessionState::Connected as u8),
            session: Mutex::new(shutdown.child_token()),
            shutdown,
            tasks: TaskTracker::new(),
        });

        inner.spawn_resync_task();
        info!(consumer_id = %inner.consumer_id, "✅ Registry session established");
        Ok(Self { inner })
    }

    /// 声明本消费者要调用的服务
    ///
    /// 为每个服务注册消费者记录，拉取一次提供者列表并开始监听变化。
    /// 任意一个服务注册失败即返回错误。
    pub async fn register_interest(&self, services: &[ServiceKey]) -> Result<()> {
        let inner = &self.inner;
        if inner.state() == SessionState::Closed {
            return Err(ConsumerError::RegistryClosed);
        }

        for key in services {
            inner.register_consumer(key).await?;
            let mut registered = inner.services.write().unwrap_or_else(|p| p.into_inner());
            if !registered.contains(key) {
                registered.push(key.clone());
            }
        }

        let session = inner.session();
        let names: BTreeSet<String> = services.iter().map(|key| key.service.clone()).collect();
        for name in names {
            inner
                .subscribe(&name, &session)
                .await
                .map_err(|e| ConsumerError::registration(name.clone(), e.to_string()))?;
        }
        Ok(())
    }

    /// 为一次调用解析出一个端点
    pub fn resolve(&self, request: &RequestDescriptor) -> Result<Endpoint> {
        self.resolve_key(&request.service_key)
    }

    /// 按服务标识解析端点（快照 + 负载均衡）
    pub fn resolve_key(&self, key: &ServiceKey) -> Result<Endpoint> {
        match self.inner.state() {
            SessionState::Closed => return Err(ConsumerError::RegistryClosed),
            SessionState::Unavailable => {
                return Err(ConsumerError::RegistryUnavailable(format!(
                    "{} session lost and reconnect attempts exhausted",
                    self.inner.backend.name()
                )))
            }
            SessionState::Connected | SessionState::Stale => {}
        }

        let endpoints = self.inner.directory.snapshot(key);
        let endpoint = self.inner.balancer.select(&endpoints, key)?;
        debug!(service = %key, address = %endpoint.address, "Resolved endpoint");
        Ok(endpoint)
    }

    /// 释放会话；重复调用是空操作
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let previous = inner.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return Ok(());
        }

        inner.shutdown.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;

        let result = inner.backend.close().await;
        inner.directory.clear();
        info!("Registry client closed");
        result
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn directory(&self) -> &Arc<EndpointDirectory> {
        &self.inner.directory
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.inner.balancer
    }

    pub fn consumer_id(&self) -> &str {
        &self.inner.consumer_id
    }

    /// 已声明订阅的服务
    pub fn services(&self) -> Vec<ServiceKey> {
        self.inner.registered_services()
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn session(&self) -> CancellationToken {
        self.session.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 结束当前会话下的所有 watch 任务，并返回新会话的令牌
    fn renew_session(&self) -> CancellationToken {
        let next = self.shutdown.child_token();
        let previous = std::mem::replace(&mut *self.session.lock().unwrap_or_else(|p| p.into_inner()), next.clone());
        previous.cancel();
        self.watching.clear();
        next
    }

    fn registered_services(&self) -> Vec<ServiceKey> {
        self.services.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn service_names(&self) -> BTreeSet<String> {
        self.registered_services()
            .into_iter()
            .map(|key| key.service)
            .collect()
    }

    async fn register_consumer(&self, key: &ServiceKey) -> Result<()> {
        let record = ConsumerRecord::new(self.consumer_id.clone(), key.clone(), self.application.clone());
        self.backend
            .register_consumer(&record)
            .await
            .map_err(|e| match e {
                ConsumerError::Registration { .. } => e,
                other => ConsumerError::registration(key.service.clone(), other.to_string()),
            })?;
        info!(service = %key, "Registered consumer interest");
        Ok(())
    }

    /// 拉取一次提供者列表并开始监听（同一个服务名只监听一次）
    async fn subscribe(self: &Arc<Self>, service: &str, session: &CancellationToken) -> Result<()> {
        let (revision, providers) = self.backend.list_providers(service).await?;
        self.apply_providers(service, revision, providers);

        if self.watching.insert(service.to_string(), ()).is_some() {
            return Ok(());
        }
        match self.backend.watch_providers(service, revision).await {
            Ok(rx) => {
                self.spawn_watch_task(service.to_string(), session.clone(), rx);
                Ok(())
            }
            Err(e) => {
                self.watching.remove(service);
                Err(e)
            }
        }
    }

    /// 把某个服务的完整提供者列表写入端点目录
    ///
    /// 版本号低于上次应用版本的通知视为乱序，直接丢弃。
    fn apply_providers(&self, service: &str, revision: i64, providers: Vec<Endpoint>) {
        let mut last = self.revisions.entry(service.to_string()).or_insert(i64::MIN);
        if revision < *last {
            debug!(service, revision, last = *last, "Dropping out-of-order provider notification");
            return;
        }
        *last = revision;

        for key in self.registered_services().iter().filter(|key| key.service == service) {
            let mut endpoints: Vec<Endpoint> = providers
                .iter()
                .filter(|endpoint| key.matches(&endpoint.service_key))
                .cloned()
                .collect();
            endpoints.sort_by(|a, b| a.address.cmp(&b.address));

            let count = endpoints.len();
            if self.directory.update(key, endpoints) {
                info!(service = %key, revision, endpoints = count, "Provider list updated");
            }
        }
    }

    fn spawn_watch_task(
        self: &Arc<Self>,
        service: String,
        session: CancellationToken,
        mut rx: mpsc::Receiver<WatchEvent>,
    ) {
        let inner = self.clone();
        self.tasks.spawn(async move {
            let reason = loop {
                let event = tokio::select! {
                    biased;
                    _ = session.cancelled() => return,
                    event = rx.recv() => event,
                };
                match event {
                    Some(WatchEvent::Providers { revision, providers }) => {
                        inner.apply_providers(&service, revision, providers);
                    }
                    Some(WatchEvent::SessionLost(reason)) => break reason,
                    None => break "watch channel closed".to_string(),
                }
            };

            // 旧会话的 watch 不再影响当前会话
            if !session.is_cancelled() {
                inner.on_session_lost(&service, &reason);
            }
        });
    }

    fn on_session_lost(self: &Arc<Self>, service: &str, reason: &str) {
        self.watching.remove(service);
        if !self.transition(SessionState::Connected, SessionState::Stale) {
            return;
        }
        warn!(service, reason, "⚠️ Registry session lost, serving last known endpoints while reconnecting");
        // 其它服务的 watch 一并结束，重连后统一重新订阅
        self.renew_session();

        let inner = self.clone();
        self.tasks.spawn(async move { inner.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let mut attempt = 0;
        while self.reconnect_policy.should_retry(attempt) {
            let delay = self.reconnect_policy.backoff_duration(attempt);
            attempt += 1;

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = self.reestablish() => result,
            };
            match result {
                Ok(()) => {
                    if self.transition(SessionState::Stale, SessionState::Connected) {
                        info!(attempt, "✅ Registry session re-established");
                    }
                    return;
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.reconnect_policy.max_attempts(), error = %e, "Registry reconnect failed");
                }
            }
        }

        if self.transition(SessionState::Stale, SessionState::Unavailable) {
            self.directory.clear();
            error!(
                attempts = attempt,
                "❌ Registry reconnect attempts exhausted, registry is unavailable"
            );
        }
    }

    async fn reestablish(self: &Arc<Self>) -> Result<()> {
        match tokio::time::timeout(self.session_timeout, self.backend.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConsumerError::connect(format!(
                    "session not established within {:?}",
                    self.session_timeout
                )))
            }
        }

        // 新会话的版本号和旧会话无关；上一次失败的尝试留下的 watch 一并结束
        let session = self.renew_session();
        self.revisions.clear();
        for key in self.registered_services() {
            self.register_consumer(&key).await?;
        }
        for name in self.service_names() {
            self.subscribe(&name, &session).await?;
        }
        Ok(())
    }

    /// 按 selector_ttl 周期全量刷新提供者列表
    fn spawn_resync_task(self: &Arc<Self>) {
        let inner = self.clone();
        self.tasks.spawn(async move {
            let mut interval_timer = tokio::time::interval(inner.resync_interval);
            // 跳过第一次 tick，订阅时已经拉取过一次
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }
                if inner.state() != SessionState::Connected {
                    continue;
                }
                for name in inner.service_names() {
                    match inner.backend.list_providers(&name).await {
                        Ok((revision, providers)) => inner.apply_providers(&name, revision, providers),
                        Err(e) => warn!(service = %name, error = %e, "Failed to refresh provider list"),
                    }
                }
            }
        });
    }
}
