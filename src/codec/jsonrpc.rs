//! JSON-RPC 2.0 over HTTP 编解码器
//!
//! 请求：`POST http://{address}/{path|service}`，
//! 请求体 `{"jsonrpc":"2.0","method":..,"params":[..],"id":n}`，
//! 调用附件作为 HTTP 头发送。

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::codec::{Codec, CodecType};
use crate::discovery::Endpoint;
use crate::error::{ConsumerError, Result};
use crate::invoker::RequestDescriptor;

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [serde_json::Value],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    #[serde(default)]
    message: String,
}

/// JSON-RPC 编解码器
pub struct JsonRpcCodec {
    client: HttpClient,
    next_id: AtomicU64,
}

impl JsonRpcCodec {
    /// 创建编解码器，`connect_timeout` 只约束建立连接的时间
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConsumerError::config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl Codec for JsonRpcCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::JsonRpc
    }

    async fn call(&self, endpoint: &Endpoint, request: &RequestDescriptor) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = endpoint.to_http_url();
        let body = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method: &request.method,
            params: &request.args,
            id,
        };

        let mut builder = self.client.post(&url).json(&body);
        for (name, value) in &request.attachments {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %url, method = %request.method, id, "Sending JSON-RPC request");
        let response = builder
            .send()
            .await
            .map_err(|e| ConsumerError::dispatch(&endpoint.address, e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConsumerError::dispatch(&endpoint.address, e.to_string()))?;

        let reply: JsonRpcResponse = match serde_json::from_slice(&bytes) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(ConsumerError::dispatch(
                    &endpoint.address,
                    format!("HTTP status {}", status),
                ))
            }
            Err(e) => return Err(ConsumerError::decode(format!("invalid JSON-RPC response: {}", e))),
        };

        if let Some(error) = reply.error {
            return Err(ConsumerError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(reply.result)
    }
}
