//! 重试策略模块
//!
//! 目前只用于注册中心会话的后台重连；单次 RPC 调用不做自动重试。

pub mod exponential;

pub use exponential::ExponentialBackoffPolicy;

use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy {
    /// `attempt` 从 0 开始计数，表示已经失败的次数
    fn should_retry(&self, attempt: usize) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}
