//! 编解码器模块
//!
//! 编解码器负责把一次调用编码后发送到选中的端点，并把响应体解析为 JSON 值；
//! 结果类型的解码由调用方完成。

pub mod jsonrpc;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::Endpoint;
use crate::error::{ConsumerError, Result};
use crate::invoker::RequestDescriptor;

pub use jsonrpc::JsonRpcCodec;

/// 支持的编解码器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    JsonRpc,
}

impl CodecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::JsonRpc => "jsonrpc",
        }
    }
}

impl std::str::FromStr for CodecType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonrpc" | "json-rpc" => Ok(CodecType::JsonRpc),
            _ => Err(format!("Unsupported protocol: {}", s)),
        }
    }
}

/// 编解码器 trait
#[async_trait]
pub trait Codec: Send + Sync {
    fn codec_type(&self) -> CodecType;

    /// 发送请求并返回响应结果
    ///
    /// 连接失败返回 `Dispatch`，响应体无法解析返回 `Decode`，
    /// 服务端返回的错误对象返回 `Remote`。
    async fn call(&self, endpoint: &Endpoint, request: &RequestDescriptor) -> Result<serde_json::Value>;
}

/// 按协议名查找编解码器
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<CodecType, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置编解码器（目前只有 JSON-RPC）
    pub fn with_defaults(connect_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonRpcCodec::new(connect_timeout)?));
        Ok(registry)
    }

    /// 注册编解码器，同类型的旧实现会被替换
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.codec_type(), codec);
    }

    /// 按协议名获取编解码器
    pub fn get(&self, protocol: &str) -> Result<Arc<dyn Codec>> {
        let codec_type = protocol
            .parse::<CodecType>()
            .map_err(ConsumerError::UnsupportedProtocol)?;
        self.codecs
            .get(&codec_type)
            .cloned()
            .ok_or_else(|| ConsumerError::UnsupportedProtocol(format!("no codec registered for {}", protocol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_parse() {
        assert_eq!("jsonrpc".parse::<CodecType>().unwrap(), CodecType::JsonRpc);
        assert_eq!("JSONRPC".parse::<CodecType>().unwrap(), CodecType::JsonRpc);
        assert!("dubbo".parse::<CodecType>().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let empty = CodecRegistry::new();
        assert!(matches!(empty.get("jsonrpc"), Err(ConsumerError::UnsupportedProtocol(_))));

        let registry = CodecRegistry::with_defaults(Duration::from_millis(100)).unwrap();
        assert_eq!(registry.get("jsonrpc").unwrap().codec_type(), CodecType::JsonRpc);
        assert!(matches!(registry.get("hessian"), Err(ConsumerError::UnsupportedProtocol(_))));
    }
}
