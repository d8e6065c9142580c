//! 集成测试公共工具
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use flare_rpc_consumer::codec::{Codec, CodecType};
use flare_rpc_consumer::{ClientConfig, Endpoint, RequestDescriptor, Result, ServiceKey};

pub const USER_PROVIDER: &str = "com.ikurento.user.UserProvider";

pub fn user_provider_key() -> ServiceKey {
    ServiceKey::new(USER_PROVIDER, "as", "2.0.0", "jsonrpc")
}

pub fn endpoint(address: &str) -> Endpoint {
    Endpoint::new(user_provider_key(), address)
}

/// 使用内存注册中心的配置
pub fn memory_config() -> ClientConfig {
    let yaml = format!(
        r#"
registry: memory
connect_timeout: 100ms
request_timeout: 5s
selector: cache
selector_ttl: 10m
registry_config:
  timeout: 3s
  max_reconnect_attempts: 3
application_config:
  name: user-center
service_list:
  - service: {}
    group: as
    version: 2.0.0
    protocol: jsonrpc
"#,
        USER_PROVIDER
    );
    ClientConfig::from_yaml_str(&yaml).expect("valid test config")
}

/// 轮询直到条件成立
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 永不返回的编解码器，记录收到的请求数
#[derive(Default)]
pub struct PendingCodec {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Codec for PendingCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::JsonRpc
    }

    async fn call(&self, _endpoint: &Endpoint, _request: &RequestDescriptor) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// 记录目标地址并原样返回参数的编解码器
#[derive(Default)]
pub struct EchoCodec {
    pub addresses: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Codec for EchoCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::JsonRpc
    }

    async fn call(&self, endpoint: &Endpoint, request: &RequestDescriptor) -> Result<serde_json::Value> {
        self.addresses.lock().unwrap().push(endpoint.address.clone());
        Ok(serde_json::Value::Array(request.args.clone()))
    }
}

/// JSON-RPC 提供者桩，返回固定用户列表，`Broken` 方法返回非法结果，其它方法返回错误
pub async fn spawn_user_provider() -> (String, Arc<std::sync::Mutex<Vec<HeaderMap>>>) {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = seen.clone();

    let app = Router::new().route(
        &format!("/{}", USER_PROVIDER),
        post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(headers);
                let id = body["id"].clone();
                let reply = match body["method"].as_str() {
                    Some("GetUserInfo") => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "User": [
                                {"id": "A003", "name": "Joe", "age": 48, "time": 1_500_000_000, "sex": "MAN"},
                                {"id": "A001", "name": "Alex", "age": 18, "time": 1_500_000_000, "sex": "WOMAN"}
                            ]
                        }
                    }),
                    Some("Broken") => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": "not a user list"
                    }),
                    _ => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"}
                    }),
                };
                Json(reply)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (address, seen)
}
