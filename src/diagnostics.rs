//! 诊断 HTTP 端点
//!
//! - `GET /debug/health`：运行状态和注册中心会话状态
//! - `GET /debug/endpoints`：端点目录快照
//! - `GET /debug/runtime`：进程和 tokio 运行时概况
//! - `GET /metrics`：prometheus 文本格式指标

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::ConsumerContext;
use crate::error::{ConsumerError, Result};
use crate::metrics::MetricsCollector;

/// 诊断端点共享状态
///
/// 诊断端点先于注册中心启动，上下文在启动完成后才会设置。
#[derive(Clone)]
pub struct DiagnosticsState {
    metrics: MetricsCollector,
    context: Arc<OnceLock<Arc<ConsumerContext>>>,
    started_at: Instant,
}

impl DiagnosticsState {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self {
            metrics,
            context: Arc::new(OnceLock::new()),
            started_at: Instant::now(),
        }
    }

    /// 启动完成后设置上下文（只生效一次）
    pub fn attach(&self, context: Arc<ConsumerContext>) {
        let _ = self.context.set(context);
    }
}

pub fn router(state: DiagnosticsState) -> Router {
    Router::new()
        .route("/debug/health", get(health))
        .route("/debug/endpoints", get(endpoints))
        .route("/debug/runtime", get(runtime))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<DiagnosticsState>) -> Json<serde_json::Value> {
    match state.context.get() {
        Some(ctx) => Json(serde_json::json!({
            "status": "serving",
            "registry": ctx.registry().state(),
            "inflight": ctx.inflight().len(),
        })),
        None => Json(serde_json::json!({ "status": "starting" })),
    }
}

async fn endpoints(State(state): State<DiagnosticsState>) -> Json<BTreeMap<String, Vec<String>>> {
    let mut view = BTreeMap::new();
    if let Some(ctx) = state.context.get() {
        let directory = ctx.registry().directory();
        for key in directory.keys() {
            let addresses = directory
                .snapshot(&key)
                .iter()
                .map(|endpoint| endpoint.address.clone())
                .collect();
            view.insert(key.to_string(), addresses);
        }
    }
    Json(view)
}

async fn runtime(State(state): State<DiagnosticsState>) -> Json<serde_json::Value> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(serde_json::json!({
        "pid": std::process::id(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "workers": metrics.num_workers(),
        "alive_tasks": metrics.num_alive_tasks(),
        "inflight_calls": state.metrics.inflight(),
    }))
}

async fn metrics(State(state): State<DiagnosticsState>) -> Response {
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// 运行中的诊断服务
pub struct DiagnosticsServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl DiagnosticsServer {
    /// 绑定地址并在后台启动
    pub async fn serve(addr: SocketAddr, state: DiagnosticsState) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ConsumerError::config(format!("failed to bind diagnostics on {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ConsumerError::config(format!("diagnostics listener: {}", e)))?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(state);
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                signal.cancelled().await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "Diagnostics server failed");
            }
        });

        info!(address = %local_addr, "Diagnostics endpoint listening");
        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止服务并等待后台任务结束
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Diagnostics server task panicked");
        }
        info!("Diagnostics endpoint stopped");
    }
}
