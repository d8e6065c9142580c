//! RPC 调用器
//!
//! 一次调用的状态流转：
//!
//! ```text
//! Built -> Resolved -> Dispatched -> Completed
//!                                 -> Failed
//!                                 -> TimedOut
//! ```
//!
//! 解析失败时直接进入 `Failed`，不会发送请求。调用失败不会自动重试。

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use crate::codec::Codec;
use crate::context::ConsumerContext;
use crate::error::{ConsumerError, Result};
use crate::types::ServiceKey;

/// 调用附件：代理标识
pub const HEADER_PROXY_ID: &str = "X-Proxy-Id";
/// 调用附件：服务名
pub const HEADER_SERVICES: &str = "X-Services";
/// 调用附件：方法名
pub const HEADER_METHOD: &str = "X-Method";
/// 调用附件：请求 ID
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

const PROXY_ID: &str = "flare-rpc-consumer";

/// 一次调用的描述
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub service_key: ServiceKey,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    pub request_id: Uuid,
    pub attachments: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(service_key: ServiceKey, method: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        let method = method.into();
        let request_id = Uuid::new_v4();

        let mut attachments = BTreeMap::new();
        attachments.insert(HEADER_PROXY_ID.to_string(), PROXY_ID.to_string());
        attachments.insert(HEADER_SERVICES.to_string(), service_key.service.clone());
        attachments.insert(HEADER_METHOD.to_string(), method.clone());
        attachments.insert(HEADER_REQUEST_ID.to_string(), request_id.to_string());

        Self {
            service_key,
            method,
            args,
            request_id,
            attachments,
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }
}

/// 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Built,
    Resolved,
    Dispatched,
    Completed,
    Failed,
    TimedOut,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed | CallState::TimedOut)
    }
}

/// 已构造、尚未执行的调用
pub struct PreparedCall {
    request: RequestDescriptor,
    codec: Arc<dyn Codec>,
}

impl PreparedCall {
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// 构造完成的调用总是处于 `Built` 状态，执行过程中的状态只存在于 `invoke` 内部
    pub fn state(&self) -> CallState {
        CallState::Built
    }
}

/// RPC 调用器
#[derive(Clone)]
pub struct Invoker {
    ctx: Arc<ConsumerContext>,
}

impl Invoker {
    pub fn new(ctx: Arc<ConsumerContext>) -> Self {
        Self { ctx }
    }

    /// 构造一次调用
    ///
    /// 服务未配置或其协议没有对应的编解码器时返回 `UnsupportedProtocol`。
    pub fn prepare(&self, service: &str, method: &str, args: Vec<serde_json::Value>) -> Result<PreparedCall> {
        let key = self.ctx.config().find_service(service).ok_or_else(|| {
            ConsumerError::UnsupportedProtocol(format!("service {} is not configured", service))
        })?;
        let codec = self.ctx.codecs().get(&key.protocol)?;

        Ok(PreparedCall {
            request: RequestDescriptor::new(key.clone(), method, args),
            codec,
        })
    }

    /// 执行调用并把结果解码为 `T`
    ///
    /// 请求超时从请求发出时开始计算。
    pub async fn invoke<T: DeserializeOwned>(&self, call: &PreparedCall) -> Result<T> {
        let _inflight = self.ctx.inflight().token();
        let metrics = self.ctx.metrics();
        let request = &call.request;
        let started = Instant::now();
        metrics.call_started();

        let (state, result) = self.execute::<T>(call).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        metrics.call_finished(&request.service_key, &request.method, outcome, started.elapsed());

        match &result {
            Ok(_) => debug!(
                request_id = %request.request_id,
                service = %request.service_key,
                method = %request.method,
                state = ?state,
                elapsed = ?started.elapsed(),
                "Call completed"
            ),
            Err(e) => error!(
                request_id = %request.request_id,
                service = %request.service_key,
                method = %request.method,
                state = ?state,
                error = %e,
                "Call failed"
            ),
        }
        result
    }

    /// 构造并执行调用
    pub async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<T> {
        let call = self.prepare(service, method, args)?;
        self.invoke(&call).await
    }

    async fn execute<T: DeserializeOwned>(&self, call: &PreparedCall) -> (CallState, Result<T>) {
        let request = &call.request;

        let endpoint = match self.ctx.registry().resolve(request) {
            Ok(endpoint) => endpoint,
            Err(e) => return (CallState::Failed, Err(e)),
        };
        trace_state(request, CallState::Resolved);

        let timeout = self.ctx.config().request_timeout;
        trace_state(request, CallState::Dispatched);
        let value = match tokio::time::timeout(timeout, call.codec.call(&endpoint, request)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return (CallState::Failed, Err(e)),
            Err(_) => {
                return (
                    CallState::TimedOut,
                    Err(ConsumerError::TimedOut {
                        endpoint: endpoint.address.clone(),
                        timeout,
                    }),
                )
            }
        };

        match serde_json::from_value::<T>(value) {
            Ok(decoded) => (CallState::Completed, Ok(decoded)),
            Err(e) => (CallState::Failed, Err(ConsumerError::from(e))),
        }
    }
}

fn trace_state(request: &RequestDescriptor, state: CallState) {
    debug!(request_id = %request.request_id, method = %request.method, state = ?state, "Call state");
}
