//! 注册中心客户端和负载均衡
//!
//! 发现数据由 `discovery` 模块的后端提供，这里负责会话管理、订阅和端点选择。

pub mod client;
pub mod load_balancer;

pub use client::{RegistryClient, SessionState};
pub use load_balancer::{LoadBalanceStrategy, LoadBalancer};
