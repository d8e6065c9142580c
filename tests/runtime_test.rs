//! 运行时生命周期集成测试

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{endpoint, memory_config, user_provider_key, PendingCodec, USER_PROVIDER};
use flare_rpc_consumer::codec::{Codec, CodecRegistry, CodecType};
use flare_rpc_consumer::{
    ConsumerError, ConsumerRuntime, Endpoint, MemoryBackend, RequestDescriptor, RuntimeConfig,
    SessionState, ShutdownOutcome,
};

/// 固定延迟后返回的编解码器
struct SlowCodec {
    delay: Duration,
}

#[async_trait]
impl Codec for SlowCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::JsonRpc
    }

    async fn call(
        &self,
        _endpoint: &Endpoint,
        _request: &RequestDescriptor,
    ) -> flare_rpc_consumer::Result<serde_json::Value> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!("done"))
    }
}

fn codecs_with(codec: Arc<dyn Codec>) -> CodecRegistry {
    let mut codecs = CodecRegistry::new();
    codecs.register(codec);
    codecs
}

#[tokio::test]
async fn test_graceful_shutdown_releases_registry() {
    let backend = MemoryBackend::new();
    backend.add_provider(endpoint("10.0.0.1:20000")).await;
    let runtime = ConsumerRuntime::builder(memory_config())
        .with_backend(Arc::new(backend.clone()))
        .start()
        .await
        .unwrap();

    let registry = runtime.registry().clone();
    assert_eq!(registry.state(), SessionState::Connected);
    assert!(backend.is_connected());

    let outcome = runtime.run_until(async {}).await;

    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(registry.state(), SessionState::Closed);
    assert!(!backend.is_connected());
    assert!(backend.consumers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_inflight_calls() {
    let backend = MemoryBackend::new();
    backend.add_provider(endpoint("10.0.0.1:20000")).await;
    let runtime = ConsumerRuntime::builder(memory_config())
        .with_backend(Arc::new(backend))
        .with_codecs(codecs_with(Arc::new(SlowCodec {
            delay: Duration::from_secs(2),
        })))
        .start()
        .await
        .unwrap();

    let invoker = runtime.invoker().clone();
    let call = tokio::spawn(async move {
        invoker
            .call::<String>(USER_PROVIDER, "GetUserInfo", vec![])
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    let outcome = runtime.shutdown().await;

    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert!(started.elapsed() >= Duration::from_millis(1900));
    assert_eq!(call.await.unwrap().unwrap(), "done");
}

#[tokio::test(start_paused = true)]
async fn test_stuck_call_forces_exit_after_deadline() {
    let codec = Arc::new(PendingCodec::default());
    let backend = MemoryBackend::new();
    backend.add_provider(endpoint("10.0.0.1:20000")).await;

    let mut config = memory_config();
    config.request_timeout = Duration::from_secs(60);
    let runtime = ConsumerRuntime::builder(config)
        .with_backend(Arc::new(backend))
        .with_codecs(codecs_with(codec.clone()))
        .start()
        .await
        .unwrap();

    let invoker = runtime.invoker().clone();
    let _call = tokio::spawn(async move {
        invoker
            .call::<serde_json::Value>(USER_PROVIDER, "GetUserInfo", vec![])
            .await
    });
    while codec.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = tokio::time::Instant::now();
    let outcome = runtime.shutdown().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, ShutdownOutcome::Forced);
    assert_eq!(outcome.exit_code(), 1);
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_custom_force_exit_deadline() {
    let codec = Arc::new(PendingCodec::default());
    let backend = MemoryBackend::new();
    backend.add_provider(endpoint("10.0.0.1:20000")).await;

    let mut config = memory_config();
    config.request_timeout = Duration::from_secs(60);
    let runtime = ConsumerRuntime::builder(config)
        .with_runtime_config(RuntimeConfig::new().with_force_exit_timeout(Duration::from_secs(2)))
        .with_backend(Arc::new(backend))
        .with_codecs(codecs_with(codec.clone()))
        .start()
        .await
        .unwrap();

    let invoker = runtime.invoker().clone();
    let _call = tokio::spawn(async move {
        invoker
            .call::<serde_json::Value>(USER_PROVIDER, "GetUserInfo", vec![])
            .await
    });
    while codec.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = tokio::time::Instant::now();
    assert_eq!(runtime.shutdown().await, ShutdownOutcome::Forced);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_registry_is_fatal() {
    let backend = MemoryBackend::new();
    backend.set_connect_delay(Some(Duration::from_secs(30)));

    let err = ConsumerRuntime::builder(memory_config())
        .with_backend(Arc::new(backend))
        .start()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConsumerError::Connect(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_registration_failure_is_fatal_and_releases_session() {
    let backend = MemoryBackend::new();
    backend.reject_registration(USER_PROVIDER);

    let err = ConsumerRuntime::builder(memory_config())
        .with_backend(Arc::new(backend.clone()))
        .start()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConsumerError::Registration { .. }));
    assert!(err.is_fatal());
    assert!(!backend.is_connected());
}

#[cfg(feature = "diagnostics")]
#[tokio::test]
async fn test_diagnostics_endpoint_reports_directory() {
    let backend = MemoryBackend::new();
    backend.add_provider(endpoint("10.0.0.1:20000")).await;
    let runtime = ConsumerRuntime::builder(memory_config())
        .with_runtime_config(
            RuntimeConfig::new().with_diagnostics_addr(Some("127.0.0.1:0".parse().unwrap())),
        )
        .with_backend(Arc::new(backend))
        .start()
        .await
        .unwrap();
    let base = format!("http://{}", runtime.diagnostics_addr().unwrap());

    let health: serde_json::Value = reqwest::get(format!("{}/debug/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "serving");
    assert_eq!(health["registry"], "connected");

    let endpoints: serde_json::Value = reqwest::get(format!("{}/debug/endpoints", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        endpoints[user_provider_key().to_string()],
        serde_json::json!(["10.0.0.1:20000"])
    );

    assert_eq!(runtime.shutdown().await, ShutdownOutcome::Graceful);
    assert!(reqwest::get(format!("{}/debug/health", base)).await.is_err());
}
