//! 指标收集模块
//!
//! 基于 prometheus 的调用指标，由诊断端点 `/metrics` 以文本格式导出。

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::error::{ConsumerError, Result};
use crate::types::ServiceKey;

/// 调用指标收集器
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    calls_total: IntCounterVec,
    call_duration: HistogramVec,
    inflight: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let calls_total = IntCounterVec::new(
            Opts::new("rpc_calls_total", "Total number of remote calls by outcome"),
            &["service", "method", "outcome"],
        )
        .map_err(metrics_error)?;
        let call_duration = HistogramVec::new(
            HistogramOpts::new("rpc_call_duration_seconds", "Remote call latency in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["service", "method"],
        )
        .map_err(metrics_error)?;
        let inflight = IntGauge::new("rpc_calls_inflight", "Remote calls currently in flight")
            .map_err(metrics_error)?;

        registry.register(Box::new(calls_total.clone())).map_err(metrics_error)?;
        registry.register(Box::new(call_duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(inflight.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            calls_total,
            call_duration,
            inflight,
        })
    }

    /// 调用开始
    pub fn call_started(&self) {
        self.inflight.inc();
    }

    /// 调用结束，记录结果和耗时
    pub fn call_finished(&self, service: &ServiceKey, method: &str, outcome: &str, duration: Duration) {
        self.inflight.dec();
        self.calls_total
            .with_label_values(&[service.service.as_str(), method, outcome])
            .inc();
        self.call_duration
            .with_label_values(&[service.service.as_str(), method])
            .observe(duration.as_secs_f64());
    }

    /// 某个结果的调用次数
    pub fn call_count(&self, service: &ServiceKey, method: &str, outcome: &str) -> u64 {
        self.calls_total
            .with_label_values(&[service.service.as_str(), method, outcome])
            .get()
    }

    pub fn inflight(&self) -> i64 {
        self.inflight.get()
    }

    /// 以 prometheus 文本格式导出
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| ConsumerError::config(format!("metrics encoding: {}", e)))
    }
}

fn metrics_error(e: prometheus::Error) -> ConsumerError {
    ConsumerError::config(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let metrics = MetricsCollector::new().unwrap();
        let key = ServiceKey::new("com.ikurento.user.UserProvider", "as", "2.0.0", "jsonrpc");

        metrics.call_started();
        assert_eq!(metrics.inflight(), 1);
        metrics.call_finished(&key, "GetUserInfo", "ok", Duration::from_millis(12));
        assert_eq!(metrics.inflight(), 0);
        assert_eq!(metrics.call_count(&key, "GetUserInfo", "ok"), 1);
        assert_eq!(metrics.call_count(&key, "GetUserInfo", "timed_out"), 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("rpc_calls_total"));
        assert!(text.contains("outcome=\"ok\""));
        assert!(text.contains("rpc_call_duration_seconds_bucket"));
    }
}
