//! 日志初始化
//!
//! `RUST_LOG` 优先于配置文件中的 `log.level`。配置了 `log.file` 时通过
//! 非阻塞写入器输出到文件，`TelemetryGuard` 被 drop 时刷新缓冲区。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};
use crate::error::{ConsumerError, Result};

/// 日志守卫，drop 时刷新尚未写出的日志
#[must_use = "dropping the guard flushes and stops the log writer"]
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

impl TelemetryGuard {
    /// 刷新并关闭日志写入器
    pub fn flush(self) {
        drop(self);
    }
}

/// 安装全局 tracing subscriber（进程内只能调用一次）
pub fn init_tracing(config: &LogConfig) -> Result<TelemetryGuard> {
    let filter = build_filter(&config.level)?;

    let (writer, file_guard) = match &config.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                ConsumerError::config(format!("log.file {} has no file name", path.display()))
            })?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConsumerError::config(format!("failed to install tracing subscriber: {}", e)))?;

    // log crate 的记录转发到 tracing
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::warn!(error = %e, "log bridge already installed");
    }

    Ok(TelemetryGuard {
        _file_guard: file_guard,
    })
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| ConsumerError::config(format!("invalid log level {:?}: {}", level, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("flare_rpc_consumer=debug,warn").is_ok());
    }

    #[test]
    fn test_file_output_is_flushed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumer.log");
        let config = LogConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: Some(path.clone()),
        };

        let guard = init_tracing(&config).unwrap();
        tracing::error!(service = "UserProvider", "call failed");
        guard.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("call failed"));
        assert!(content.contains("UserProvider"));
    }
}
