//! 消费端运行时框架
//!
//! 提供统一的消费端生命周期管理
//!
//! # 设计理念
//!
//! 1. **显式上下文**：配置、注册中心客户端、编解码器和指标放在 `ConsumerContext` 中传递
//! 2. **启动即校验**：配置错误、注册中心连接失败、服务注册失败都在 `start` 中返回
//! 3. **有期限的优雅停机**：有序关闭和强制退出期限赛跑，结果由调用方映射为退出码
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use flare_rpc_consumer::config::ClientConfig;
//! use flare_rpc_consumer::runtime::{ConsumerRuntime, ShutdownOutcome};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let runtime = ConsumerRuntime::start(config).await?;
//!
//! let users: serde_json::Value = runtime
//!     .invoker()
//!     .call("com.ikurento.user.UserProvider", "GetUserInfo", vec![serde_json::json!(["A003"])])
//!     .await?;
//! println!("{}", users);
//!
//! if runtime.run().await? == ShutdownOutcome::Forced {
//!     std::process::exit(1);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::{ConsumerRuntime, ConsumerRuntimeBuilder, ShutdownOutcome};
