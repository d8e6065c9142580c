//! 负载均衡模块
//!
//! 从某个服务的当前端点集合中选择一个端点

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::discovery::Endpoint;
use crate::error::{ConsumerError, Result};
use crate::types::ServiceKey;

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// 轮询（按 ServiceKey 维护游标）
    #[default]
    RoundRobin,
    /// 随机
    Random,
}

impl std::str::FromStr for LoadBalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            // "cache" 是旧配置里 selector 的默认取值，语义上就是轮询
            "round_robin" | "roundrobin" | "cache" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            _ => Err(format!("Unknown load balance strategy: {}", s)),
        }
    }
}

/// 负载均衡器
///
/// 轮询游标按 ServiceKey 分开维护，是一个原子递增的计数器，
/// 并发选择同一个服务时不会重复选中同一个位置。
/// 选择时对当前集合大小取模，集合增删后游标不会被重置。
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    cursors: DashMap<ServiceKey, AtomicUsize>,
}

impl LoadBalancer {
    /// 创建新的负载均衡器
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            cursors: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// 选择服务端点
    pub fn select(&self, endpoints: &[Endpoint], key: &ServiceKey) -> Result<Endpoint> {
        if endpoints.is_empty() {
            return Err(ConsumerError::NoAvailableEndpoint(key.to_string()));
        }

        let index = match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.next_round_robin(key, endpoints.len()),
            LoadBalanceStrategy::Random => rand::thread_rng().gen_range(0..endpoints.len()),
        };

        Ok(endpoints[index].clone())
    }

    /// 当前游标计数（未选择过的服务返回 None）
    pub fn cursor(&self, key: &ServiceKey) -> Option<usize> {
        self.cursors
            .get(key)
            .map(|cursor| cursor.load(Ordering::Acquire))
    }

    /// 轮询选择：游标加一，返回本次使用的下标
    fn next_round_robin(&self, key: &ServiceKey, len: usize) -> usize {
        let advance = |cursor: &AtomicUsize| cursor.fetch_add(1, Ordering::AcqRel) % len;

        if let Some(cursor) = self.cursors.get(key) {
            return advance(cursor.value());
        }
        let cursor = self
            .cursors
            .entry(key.clone())
            .or_insert_with(|| AtomicUsize::new(0))
            .downgrade();
        advance(cursor.value())
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::RoundRobin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn key() -> ServiceKey {
        ServiceKey::new("UserProvider", "groupA", "v1", "jsonrpc")
    }

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::new(key(), format!("10.0.0.{}:20000", i + 1)))
            .collect()
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!("cache".parse::<LoadBalanceStrategy>(), Ok(LoadBalanceStrategy::RoundRobin));
        assert_eq!("round-robin".parse::<LoadBalanceStrategy>(), Ok(LoadBalanceStrategy::RoundRobin));
        assert_eq!("Random".parse::<LoadBalanceStrategy>(), Ok(LoadBalanceStrategy::Random));
        assert!("least_conn".parse::<LoadBalanceStrategy>().is_err());
    }

    #[test]
    fn test_empty_set_fails() {
        let lb = LoadBalancer::default();
        let err = lb.select(&[], &key()).unwrap_err();
        assert!(matches!(err, ConsumerError::NoAvailableEndpoint(_)));
        assert_eq!(lb.cursor(&key()), None);
    }

    #[test]
    fn test_round_robin_alternates() {
        let lb = LoadBalancer::default();
        let eps = endpoints(2);
        let picked: Vec<String> = (0..3)
            .map(|_| lb.select(&eps, &key()).unwrap().address)
            .collect();
        assert_eq!(picked, vec!["10.0.0.1:20000", "10.0.0.2:20000", "10.0.0.1:20000"]);
    }

    #[test]
    fn test_round_robin_fairness() {
        let lb = LoadBalancer::default();
        let n = 3;
        let k = 7;
        let eps = endpoints(n);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..(n + k) {
            *counts.entry(lb.select(&eps, &key()).unwrap().address).or_default() += 1;
        }
        for ep in &eps {
            assert!(counts[&ep.address] >= k / n);
        }
    }

    #[test]
    fn test_cursor_survives_resize() {
        let lb = LoadBalancer::default();
        let eps = endpoints(4);
        for _ in 0..3 {
            lb.select(&eps, &key()).unwrap();
        }
        assert_eq!(lb.cursor(&key()), Some(3));

        // 缩容到 2 个端点：游标 3 取模后落在下标 1
        let shrunk = endpoints(2);
        assert_eq!(lb.select(&shrunk, &key()).unwrap().address, "10.0.0.2:20000");
        assert_eq!(lb.select(&shrunk, &key()).unwrap().address, "10.0.0.1:20000");
        assert_eq!(lb.cursor(&key()), Some(5));

        // 扩容回 4 个端点：从计数 5 继续
        assert_eq!(lb.select(&eps, &key()).unwrap().address, "10.0.0.2:20000");
        assert_eq!(lb.cursor(&key()), Some(6));
    }

    #[test]
    fn test_cursors_are_per_key() {
        let lb = LoadBalancer::default();
        let other = ServiceKey::new("OrderProvider", "groupA", "v1", "jsonrpc");
        let eps = endpoints(2);
        lb.select(&eps, &key()).unwrap();
        assert_eq!(lb.select(&eps, &other).unwrap().address, "10.0.0.1:20000");
    }

    #[test]
    fn test_random_stays_in_range() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::Random);
        let eps = endpoints(3);
        for _ in 0..50 {
            let picked = lb.select(&eps, &key()).unwrap();
            assert!(eps.contains(&picked));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_round_robin_is_even() {
        let lb = Arc::new(LoadBalancer::default());
        let eps = Arc::new(endpoints(2));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lb = lb.clone();
            let eps = eps.clone();
            handles.push(tokio::spawn(async move {
                let mut local: HashMap<String, usize> = HashMap::new();
                for _ in 0..500 {
                    *local.entry(lb.select(&eps, &key()).unwrap().address).or_default() += 1;
                }
                local
            }));
        }
        let mut totals: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for (addr, count) in handle.await.unwrap() {
                *totals.entry(addr).or_default() += count;
            }
        }
        // 每次选择都原子推进游标，两个端点严格各一半
        assert_eq!(totals["10.0.0.1:20000"], 1_000);
        assert_eq!(totals["10.0.0.2:20000"], 1_000);
    }
}
