//! 端点目录
//!
//! 按 `ServiceKey` 保存当前存活的服务端点集合。
//!
//! - 每个 key 对应一个不可变的 `Arc<[Endpoint]>` 快照，更新时整体替换，
//!   读者拿到的要么是更新前的集合，要么是更新后的集合
//! - 底层是分片 map，不同 key 的更新互不阻塞
//! - 同一集合内不会出现重复地址

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::discovery::endpoint::Endpoint;
use crate::types::ServiceKey;

/// 端点目录
#[derive(Debug, Default)]
pub struct EndpointDirectory {
    entries: DashMap<ServiceKey, Arc<[Endpoint]>>,
}

impl EndpointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子替换某个服务的端点集合
    ///
    /// 重复地址只保留第一次出现的端点。返回可见内容是否发生变化，
    /// 内容相同的重复通知不会产生任何变化。
    pub fn update(&self, key: &ServiceKey, endpoints: Vec<Endpoint>) -> bool {
        let mut seen = HashSet::with_capacity(endpoints.len());
        let deduped: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|ep| seen.insert(ep.address.clone()))
            .collect();

        match self.entries.get_mut(key) {
            Some(mut current) => {
                if current.as_ref() == deduped.as_slice() {
                    return false;
                }
                *current = Arc::from(deduped);
                true
            }
            None => {
                self.entries.insert(key.clone(), Arc::from(deduped));
                true
            }
        }
    }

    /// 获取某个服务端点集合的一致性快照；未知服务返回空集合
    pub fn snapshot(&self, key: &ServiceKey) -> Arc<[Endpoint]> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// 移除某个服务
    pub fn remove(&self, key: &ServiceKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// 清空目录（注册中心不可用时调用）
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// 已知的服务列表
    pub fn keys(&self) -> Vec<ServiceKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
