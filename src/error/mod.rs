//! 错误处理模块
//!
//! 提供消费端统一的错误类型和错误代码分类

pub mod code;
pub mod consumer_error;

pub use code::{ErrorCategory, ErrorCode};
pub use consumer_error::{ConsumerError, Result};
