//! 服务发现模块
//!
//! 端点目录、服务端点定义以及注册中心后端（etcd、内存）。

pub mod backend;
pub mod directory;
pub mod endpoint;

pub use backend::{create_backend, ConsumerRecord, MemoryBackend, RegistryBackend, WatchEvent};
pub use directory::EndpointDirectory;
pub use endpoint::Endpoint;
