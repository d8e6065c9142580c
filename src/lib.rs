//! Flare RPC Consumer Library
//!
//! Registry-backed RPC consumer runtime: discovers provider endpoints through a
//! coordination service, load-balances among them, issues JSON-RPC calls with
//! connect/request timeouts, and tears itself down cleanly on signal.

pub mod codec;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod invoker;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod telemetry;
pub mod types;

#[cfg(feature = "diagnostics")]
pub mod diagnostics;

// Re-exports
pub use codec::{Codec, CodecRegistry, CodecType, JsonRpcCodec};
pub use config::{ClientConfig, LogConfig, LogFormat, RegistryConfig, RegistryKind};
pub use context::ConsumerContext;
pub use discovery::{Endpoint, EndpointDirectory, MemoryBackend, RegistryBackend, WatchEvent};
pub use error::{ConsumerError, ErrorCategory, ErrorCode, Result};
pub use invoker::{CallState, Invoker, PreparedCall, RequestDescriptor};
pub use metrics::MetricsCollector;
pub use registry::{LoadBalanceStrategy, LoadBalancer, RegistryClient, SessionState};
pub use runtime::{ConsumerRuntime, RuntimeConfig, ShutdownOutcome};
pub use telemetry::{init_tracing, TelemetryGuard};
pub use types::{ApplicationInfo, ServiceKey};
