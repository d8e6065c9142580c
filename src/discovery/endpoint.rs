//! 服务端点定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ServiceKey;

/// 服务端点
///
/// 一个服务提供者实例的网络地址和协议相关元数据。
/// 注册中心里保存的提供者记录就是该结构的 JSON 形式。
/// 端点不会被原地修改，变化时整体替换。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// 所属服务
    pub service_key: ServiceKey,

    /// 实例 ID（唯一标识）
    #[serde(default)]
    pub instance_id: String,

    /// 服务地址（host:port）
    pub address: String,

    /// 请求路径，缺省时使用服务名
    #[serde(default)]
    pub path: Option<String>,

    /// 权重（用于负载均衡）
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// 自定义元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    100
}

impl Endpoint {
    /// 创建新的端点
    pub fn new(service_key: ServiceKey, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            service_key,
            instance_id: address.clone(),
            address,
            path: None,
            weight: default_weight(),
            metadata: HashMap::new(),
        }
    }

    /// 设置实例 ID
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// 设置请求路径
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 转换为 HTTP URL
    pub fn to_http_url(&self) -> String {
        let path = self
            .path
            .as_deref()
            .unwrap_or(&self.service_key.service)
            .trim_start_matches('/');
        format!("http://{}/{}", self.address, path)
    }
}
