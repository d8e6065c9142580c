//! etcd 后端集成测试
//!
//! 这些测试需要运行中的 etcd 服务器实例。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test etcd_backend_test -- --ignored` 运行。
//!
//! 启动 etcd 服务器：
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```
#![cfg(feature = "etcd")]

use etcd_client::{Client, GetOptions};
use flare_rpc_consumer::discovery::backend::etcd::EtcdBackend;
use flare_rpc_consumer::discovery::{ConsumerRecord, Endpoint, RegistryBackend, WatchEvent};
use flare_rpc_consumer::{ApplicationInfo, RegistryConfig, ServiceKey};
use tokio::time::{timeout, Duration};

/// etcd 服务器地址
/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 http://127.0.0.1:2379
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

/// 每个测试使用独立的根路径，互不干扰
fn create_test_config() -> RegistryConfig {
    RegistryConfig {
        address: etcd_endpoints(),
        timeout: Duration::from_secs(3),
        username: None,
        password: None,
        root: format!("/flare-test-{}", uuid::Uuid::new_v4()),
        max_reconnect_attempts: 3,
        consumer_ttl: Duration::from_secs(30),
    }
}

fn user_provider() -> ServiceKey {
    ServiceKey::new("com.ikurento.user.UserProvider", "as", "2.0.0", "jsonrpc")
}

async fn put_provider(config: &RegistryConfig, endpoint: &Endpoint) {
    let mut client = Client::connect(&config.address, None).await.expect("connect etcd");
    let key = format!(
        "{}/{}/providers/{}",
        config.root, endpoint.service_key.service, endpoint.address
    );
    client
        .put(key, serde_json::to_vec(endpoint).unwrap(), None)
        .await
        .expect("put provider");
}

async fn cleanup(config: &RegistryConfig) {
    let mut client = Client::connect(&config.address, None).await.expect("connect etcd");
    let _ = client
        .delete(config.root.clone(), Some(etcd_client::DeleteOptions::new().with_prefix()))
        .await;
}

/// 测试：列出提供者
#[tokio::test]
#[ignore]
async fn test_etcd_list_providers() {
    let config = create_test_config();
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    put_provider(&config, &Endpoint::new(user_provider(), "127.0.0.1:20000")).await;
    put_provider(&config, &Endpoint::new(user_provider(), "127.0.0.1:20001")).await;

    let (revision, providers) = backend
        .list_providers("com.ikurento.user.UserProvider")
        .await
        .expect("Failed to list providers");

    assert!(revision > 0);
    assert_eq!(providers.len(), 2);

    backend.close().await.unwrap();
    cleanup(&config).await;
}

/// 测试：监听提供者变化
#[tokio::test]
#[ignore]
async fn test_etcd_watch_providers() {
    let config = create_test_config();
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    let mut rx = backend
        .watch_providers("com.ikurento.user.UserProvider", 0)
        .await
        .expect("Failed to watch providers");

    put_provider(&config, &Endpoint::new(user_provider(), "127.0.0.1:20002")).await;

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("No watch event within 5s")
        .expect("Watch channel closed");
    match event {
        WatchEvent::Providers { revision, providers } => {
            assert!(revision > 0);
            assert!(providers.iter().any(|p| p.address == "127.0.0.1:20002"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    backend.close().await.unwrap();
    cleanup(&config).await;
}

/// 测试：消费者注册和注销
#[tokio::test]
#[ignore]
async fn test_etcd_consumer_registration() {
    let config = create_test_config();
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    let record = ConsumerRecord::new("user-center-1", user_provider(), ApplicationInfo::default());
    backend
        .register_consumer(&record)
        .await
        .expect("Failed to register consumer");

    let prefix = format!("{}/com.ikurento.user.UserProvider/consumers/", config.root);
    let mut client = Client::connect(&config.address, None).await.unwrap();
    let resp = client
        .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
        .await
        .unwrap();
    assert_eq!(resp.kvs().len(), 1);

    backend.unregister_consumers().await.unwrap();
    let resp = client
        .get(prefix, Some(GetOptions::new().with_prefix()))
        .await
        .unwrap();
    assert!(resp.kvs().is_empty(), "Consumer record still exists after unregistration");

    backend.close().await.unwrap();
    cleanup(&config).await;
}

/// 测试：列表之后、监听之前的变化不会丢失
#[tokio::test]
#[ignore]
async fn test_etcd_watch_starts_after_list_revision() {
    let config = create_test_config();
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    let (listed, providers) = backend
        .list_providers("com.ikurento.user.UserProvider")
        .await
        .unwrap();
    assert!(providers.is_empty());

    put_provider(&config, &Endpoint::new(user_provider(), "127.0.0.1:20003")).await;

    let mut rx = backend
        .watch_providers("com.ikurento.user.UserProvider", listed)
        .await
        .unwrap();
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("No catch-up event within 5s")
        .expect("Watch channel closed");
    match event {
        WatchEvent::Providers { revision, providers } => {
            assert!(revision > listed);
            assert_eq!(providers.len(), 1);
            assert_eq!(providers[0].address, "127.0.0.1:20003");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    backend.close().await.unwrap();
    cleanup(&config).await;
}

/// 测试：租约被撤销后 watch 收到 SessionLost
#[tokio::test]
#[ignore]
async fn test_etcd_lease_loss_ends_session() {
    let mut config = create_test_config();
    config.consumer_ttl = Duration::from_secs(3);
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    let mut rx = backend
        .watch_providers("com.ikurento.user.UserProvider", 0)
        .await
        .unwrap();
    let record = ConsumerRecord::new("user-center-2", user_provider(), ApplicationInfo::default());
    backend.register_consumer(&record).await.unwrap();

    // 从外部撤销本进程的租约
    let prefix = format!("{}/com.ikurento.user.UserProvider/consumers/", config.root);
    let mut client = Client::connect(&config.address, None).await.unwrap();
    let resp = client
        .get(prefix, Some(GetOptions::new().with_prefix()))
        .await
        .unwrap();
    let lease_id = resp.kvs()[0].lease();
    client.lease_revoke(lease_id).await.unwrap();

    let event = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("Lease loss not reported within 10s")
        .expect("Watch channel closed");
    assert!(matches!(event, WatchEvent::SessionLost(_)));

    backend.close().await.unwrap();
    cleanup(&config).await;
}

/// 测试：关闭后台 watch 任务随之结束
#[tokio::test]
#[ignore]
async fn test_etcd_close_ends_watch() {
    let config = create_test_config();
    let backend = EtcdBackend::new(config.clone());
    backend.connect().await.expect("Failed to connect etcd backend");

    let mut rx = backend
        .watch_providers("com.ikurento.user.UserProvider", 0)
        .await
        .unwrap();
    timeout(Duration::from_secs(5), backend.close())
        .await
        .expect("close did not finish")
        .unwrap();
    assert_eq!(rx.recv().await, None);
    cleanup(&config).await;
}

/// 测试：etcd 不可达时连接失败
#[tokio::test]
#[ignore]
async fn test_etcd_unreachable() {
    let mut config = create_test_config();
    config.address = vec!["http://127.0.0.1:1".to_string()];
    config.timeout = Duration::from_millis(500);

    let backend = EtcdBackend::new(config);
    assert!(backend.connect().await.is_err());
}
