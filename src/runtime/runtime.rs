//! 消费端运行时实现
//!
//! 统一管理消费端的生命周期：
//! - 启动：诊断端点 -> 注册中心会话 -> 声明订阅 -> 就绪
//! - 运行：等待信号（SIGHUP 忽略；SIGINT / SIGQUIT / SIGTERM 触发关闭）
//! - 关闭：有序关闭和强制退出期限赛跑

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::codec::CodecRegistry;
use crate::config::ClientConfig;
use crate::context::ConsumerContext;
use crate::discovery::{create_backend, RegistryBackend};
use crate::error::Result;
use crate::invoker::Invoker;
use crate::metrics::MetricsCollector;
use crate::registry::RegistryClient;
use crate::runtime::config::RuntimeConfig;
use crate::telemetry::TelemetryGuard;

/// 关闭结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// 有序关闭在期限内完成
    Graceful,
    /// 超过强制退出期限
    Forced,
}

impl ShutdownOutcome {
    /// 对应的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced => 1,
        }
    }
}

/// 消费端运行时构建器
pub struct ConsumerRuntimeBuilder {
    config: ClientConfig,
    runtime_config: RuntimeConfig,
    backend: Option<Arc<dyn RegistryBackend>>,
    codecs: Option<CodecRegistry>,
    telemetry: Option<TelemetryGuard>,
}

impl ConsumerRuntimeBuilder {
    /// 设置运行时配置（默认由 `ClientConfig` 推导）
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// 使用指定的注册中心后端（默认按 `registry` 配置创建）
    pub fn with_backend(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 使用指定的编解码器集合（默认只有 JSON-RPC）
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Some(codecs);
        self
    }

    /// 交给运行时持有的日志守卫，关闭时最后释放
    pub fn with_telemetry(mut self, guard: TelemetryGuard) -> Self {
        self.telemetry = Some(guard);
        self
    }

    /// 启动运行时
    ///
    /// 注册中心会话无法建立或服务注册失败时返回错误，调用方应视为致命错误。
    pub async fn start(self) -> Result<ConsumerRuntime> {
        let config = Arc::new(self.config);
        info!(
            application = %config.application.name,
            registry = ?config.registry,
            services = config.service_list.len(),
            "🚀 Starting consumer runtime"
        );

        let metrics = MetricsCollector::new()?;
        let diagnostics = DiagnosticsHandle::start(self.runtime_config.diagnostics_addr, &metrics).await;

        let backend = match self.backend {
            Some(backend) => backend,
            None => create_backend(config.registry, &config.registry_config)?,
        };
        let codecs = match self.codecs {
            Some(codecs) => codecs,
            None => CodecRegistry::with_defaults(config.connect_timeout)?,
        };

        let registry = match RegistryClient::connect(&config, backend).await {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, "❌ Failed to establish registry session");
                diagnostics.stop().await;
                return Err(e);
            }
        };
        if let Err(e) = registry.register_interest(&config.service_list).await {
            error!(error = %e, "❌ Service registration failed, shutting down");
            if let Err(close_err) = registry.close().await {
                warn!(error = %close_err, "⚠️ Failed to close registry session");
            }
            diagnostics.stop().await;
            return Err(e);
        }

        let ctx = Arc::new(ConsumerContext::new(config, registry, codecs, metrics));
        diagnostics.attach(&ctx);
        info!("✅ Consumer runtime is ready");

        Ok(ConsumerRuntime {
            invoker: Invoker::new(ctx.clone()),
            ctx,
            config: self.runtime_config,
            diagnostics,
            telemetry: self.telemetry,
        })
    }
}

/// 消费端运行时
pub struct ConsumerRuntime {
    ctx: Arc<ConsumerContext>,
    invoker: Invoker,
    config: RuntimeConfig,
    diagnostics: DiagnosticsHandle,
    telemetry: Option<TelemetryGuard>,
}

impl ConsumerRuntime {
    pub fn builder(config: ClientConfig) -> ConsumerRuntimeBuilder {
        ConsumerRuntimeBuilder {
            runtime_config: RuntimeConfig::from(&config),
            config,
            backend: None,
            codecs: None,
            telemetry: None,
        }
    }

    /// 按配置启动运行时
    pub async fn start(config: ClientConfig) -> Result<Self> {
        Self::builder(config).start().await
    }

    pub fn context(&self) -> &Arc<ConsumerContext> {
        &self.ctx
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn registry(&self) -> &RegistryClient {
        self.ctx.registry()
    }

    /// 诊断端点实际监听的地址
    pub fn diagnostics_addr(&self) -> Option<SocketAddr> {
        self.diagnostics.local_addr()
    }

    /// 等待进程信号后关闭
    pub async fn run(self) -> anyhow::Result<ShutdownOutcome> {
        if let Err(e) = wait_for_signal().await {
            error!(error = %e, "Failed to listen for shutdown signals");
            self.shutdown().await;
            return Err(e);
        }
        Ok(self.shutdown().await)
    }

    /// 等待任意关闭信号后关闭
    pub async fn run_until<F>(self, signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Shutdown requested");
        self.shutdown().await
    }

    /// 关闭运行时
    ///
    /// 有序关闭（关闭注册中心会话、等待进行中的调用、停止诊断端点）
    /// 和强制退出期限赛跑；日志总是在最后刷新。
    pub async fn shutdown(mut self) -> ShutdownOutcome {
        let deadline = self.config.force_exit_timeout;
        info!(force_exit_timeout = ?deadline, "Shutting down consumer runtime...");

        let telemetry = self.telemetry.take();
        let diagnostics = std::mem::take(&mut self.diagnostics);

        let outcome = tokio::select! {
            _ = teardown(&self.ctx, diagnostics) => ShutdownOutcome::Graceful,
            _ = tokio::time::sleep(deadline) => {
                error!(
                    inflight = self.ctx.inflight().len(),
                    "❌ Shutdown did not finish within {:?}, forcing exit", deadline
                );
                ShutdownOutcome::Forced
            }
        };

        info!(outcome = ?outcome, "👋 Consumer runtime stopped");
        drop(telemetry);
        outcome
    }
}

async fn teardown(ctx: &ConsumerContext, diagnostics: DiagnosticsHandle) {
    if let Err(e) = ctx.registry().close().await {
        warn!(error = %e, "⚠️ Failed to close registry session gracefully");
    }

    let inflight = ctx.inflight();
    inflight.close();
    if !inflight.is_empty() {
        info!(inflight = inflight.len(), "Waiting for in-flight calls to finish...");
    }
    inflight.wait().await;

    diagnostics.stop().await;
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, ignored");
            }
            _ = interrupt.recv() => {
                info!("Shutdown signal received (SIGINT)");
                return Ok(());
            }
            _ = quit.recv() => {
                info!("Shutdown signal received (SIGQUIT)");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Shutdown signal received (SIGTERM)");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received (Ctrl+C)");
    Ok(())
}

/// 诊断端点句柄（未编译诊断支持时为空）
#[derive(Default)]
struct DiagnosticsHandle {
    #[cfg(feature = "diagnostics")]
    running: Option<(
        crate::diagnostics::DiagnosticsServer,
        crate::diagnostics::DiagnosticsState,
    )>,
}

impl DiagnosticsHandle {
    #[cfg(feature = "diagnostics")]
    async fn start(addr: Option<SocketAddr>, metrics: &MetricsCollector) -> Self {
        use crate::diagnostics::{DiagnosticsServer, DiagnosticsState};

        let Some(addr) = addr else {
            return Self::default();
        };
        let state = DiagnosticsState::new(metrics.clone());
        match DiagnosticsServer::serve(addr, state.clone()).await {
            Ok(server) => Self {
                running: Some((server, state)),
            },
            Err(e) => {
                warn!(error = %e, "⚠️ Diagnostics endpoint disabled");
                Self::default()
            }
        }
    }

    #[cfg(not(feature = "diagnostics"))]
    async fn start(addr: Option<SocketAddr>, _metrics: &MetricsCollector) -> Self {
        if addr.is_some() {
            warn!("Diagnostics support is not compiled in, pprof_enabled ignored");
        }
        Self::default()
    }

    fn attach(&self, _ctx: &Arc<ConsumerContext>) {
        #[cfg(feature = "diagnostics")]
        if let Some((_, state)) = &self.running {
            state.attach(_ctx.clone());
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        #[cfg(feature = "diagnostics")]
        {
            self.running.as_ref().map(|(server, _)| server.local_addr())
        }
        #[cfg(not(feature = "diagnostics"))]
        {
            None
        }
    }

    async fn stop(self) {
        #[cfg(feature = "diagnostics")]
        if let Some((server, _)) = self.running {
            server.stop().await;
        }
    }
}
