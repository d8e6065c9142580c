use serde::{Deserialize, Serialize};
use std::fmt;

/// 逻辑服务标识
///
/// 同一个 `ServiceKey` 下可以有多个服务提供者实例。构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub service: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub protocol: String,
}

impl ServiceKey {
    pub fn new(
        service: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            group: group.into(),
            version: version.into(),
            protocol: protocol.into(),
        }
    }

    /// 提供者记录是否属于该服务（service / group / version / protocol 全部匹配）
    pub fn matches(&self, other: &ServiceKey) -> bool {
        self == other
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}?group={}&version={}",
            self.protocol, self.service, self.group, self.version
        )
    }
}

/// 应用元数据，随消费者记录一起发布到注册中心
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub environment: String,
}
