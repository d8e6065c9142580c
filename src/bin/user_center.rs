//! user-center 消费端
//!
//! 启动后调用一次 `UserProvider.GetUserInfo`，然后等待信号关闭。
//! 配置文件路径由 `APP_CONF_FILE` 指定。

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

use flare_rpc_consumer::{init_tracing, ClientConfig, ConsumerRuntime, ShutdownOutcome};

const USER_PROVIDER: &str = "com.ikurento.user.UserProvider";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct JsonRpcUser {
    id: String,
    name: String,
    age: i64,
    /// unix 秒
    time: i64,
    sex: String,
}

impl fmt::Display for JsonRpcUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = DateTime::from_timestamp(self.time, 0)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| self.time.to_string());
        write!(
            f,
            "User{{ID:{}, Name:{}, Age:{}, Time:{}, Sex:{}}}",
            self.id, self.name, self.age, time, self.sex
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct Users {
    #[serde(rename = "User", default)]
    users: Vec<JsonRpcUser>,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(ShutdownOutcome::Graceful) => {}
        Ok(ShutdownOutcome::Forced) => std::process::exit(ShutdownOutcome::Forced.exit_code()),
        Err(e) => {
            eprintln!("user-center: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<ShutdownOutcome> {
    let config = ClientConfig::from_env()?;
    let guard = init_tracing(&config.log)?;

    let runtime = ConsumerRuntime::builder(config)
        .with_telemetry(guard)
        .start()
        .await?;

    let args = vec![serde_json::json!(["A003", "A001"])];
    match runtime
        .invoker()
        .call::<Users>(USER_PROVIDER, "GetUserInfo", args)
        .await
    {
        Ok(users) => {
            info!(count = users.users.len(), "GetUserInfo succeeded");
            for user in &users.users {
                info!("response result: {}", user);
            }
        }
        Err(e) => error!(error = %e, code = e.code().as_u32(), "GetUserInfo failed"),
    }

    runtime.run().await
}
