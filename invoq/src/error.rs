//! 错误处理模块
//! Error handling module
//!
//! 定义了 Invoq 库中使用的各种错误类型
//! Defines various error types used in the Invoq library

use crate::task::TaskStatus;
use thiserror::Error;

/// Invoq 库的结果类型
/// Result type for the Invoq library
pub type Result<T> = std::result::Result<T, Error>;

/// Invoq 错误类型
/// Invoq error type
#[derive(Error, Debug)]
pub enum Error {
  /// Redis connection error
  #[error("Redis connection error: {0}")]
  Redis(#[from] redis::RedisError),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// PDF 解析错误
  /// PDF parsing error
  #[error("PDF error: {0}")]
  Pdf(#[from] lopdf::Error),

  /// ZIP 归档错误
  /// ZIP archive error
  #[error("ZIP error: {0}")]
  Zip(#[from] zip::result::ZipError),

  /// 缺少会话标识
  /// Missing session identifier
  #[error("Missing session identifier")]
  MissingSession,

  /// 无效的会话标识
  /// Invalid session identifier
  #[error("Invalid session identifier: {0}")]
  InvalidSessionId(String),

  /// 请求格式错误
  /// Malformed request
  #[error("Bad request: {message}")]
  BadRequest { message: String },

  /// 不支持的文件类型
  /// Unsupported media type
  #[error("Unsupported media type: {name}")]
  UnsupportedMediaType { name: String },

  /// 上传体积超限
  /// Upload exceeds the size cap
  #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
  PayloadTooLarge { size: u64, limit: u64 },

  /// 任务未找到（包括跨会话访问）
  /// Task not found (also covers cross-session access)
  #[error("Task not found: {id}")]
  TaskNotFound { id: String },

  /// 任务 ID 冲突错误
  /// Task ID conflict error
  #[error("Task already exists: {id}")]
  TaskExists { id: String },

  /// 状态转换时观察到的状态与预期不符
  /// Observed status did not match the expected set during a transition
  #[error("Stale state for task {task_id}: observed {observed}")]
  StaleState { task_id: String, observed: TaskStatus },

  /// 队列已满，拒绝接收
  /// Queue is full, admission refused
  #[error("Queue is full, try again later")]
  Backpressure,

  /// 请求频率受限
  /// Rate limited
  #[error("Rate limited")]
  RateLimited,

  /// 存储空间不足
  /// Storage exhausted
  #[error("Storage full")]
  StorageFull,

  /// 无法读取的输入文件
  /// Unreadable input file
  #[error("Unreadable input: {file}")]
  BadInput { file: String },

  /// 批次中没有任何页面
  /// Batch contributed zero pages
  #[error("Empty batch: no pages found across all inputs")]
  EmptyBatch,

  /// 输入超出内存上限（ZIP 炸弹 / 内存天花板）
  /// Inputs exceed the memory ceiling (ZIP bomb / memory cap)
  #[error("Oversize input: {message}")]
  Oversize { message: String },

  /// 超时错误
  /// Timeout error
  #[error("Operation timed out")]
  Timeout,

  /// 取消错误
  /// Cancellation error
  #[error("Operation cancelled")]
  Cancelled,

  /// 服务关停，任务被中断
  /// Service shutting down, work interrupted
  #[error("Server shutting down")]
  Shutdown,

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 其他内部错误
  /// Other internal error
  #[error("Internal error: {message}")]
  Internal { message: String },
}

impl Error {
  /// 创建请求格式错误
  /// Create a bad request error
  pub fn bad_request<S: Into<String>>(message: S) -> Self {
    Self::BadRequest {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建内部错误
  /// Create an internal error
  pub fn internal<S: Into<String>>(message: S) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  /// 创建无法读取输入错误
  /// Create an unreadable input error
  pub fn bad_input<S: Into<String>>(file: S) -> Self {
    Self::BadInput { file: file.into() }
  }

  /// 创建超限错误
  /// Create an oversize error
  pub fn oversize<S: Into<String>>(message: S) -> Self {
    Self::Oversize {
      message: message.into(),
    }
  }

  /// 任务处理失败时写入记录的稳定错误代码
  /// Stable error code written to the record when task processing fails
  pub fn error_kind(&self) -> &'static str {
    match self {
      Error::MissingSession => "MISSING_SESSION",
      Error::InvalidSessionId(_) => "INVALID_SESSION",
      Error::BadRequest { .. } => "BAD_REQUEST",
      Error::UnsupportedMediaType { .. } => "UNSUPPORTED_MEDIA_TYPE",
      Error::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
      Error::TaskNotFound { .. } => "NOT_FOUND",
      Error::TaskExists { .. } => "TASK_EXISTS",
      Error::StaleState { .. } => "STALE_STATE",
      Error::Backpressure => "BACKPRESSURE",
      Error::RateLimited => "RATE_LIMITED",
      Error::StorageFull => "STORAGE_FULL",
      Error::BadInput { .. } => "BAD_INPUT",
      Error::EmptyBatch => "EMPTY_BATCH",
      Error::Oversize { .. } => "OVERSIZE",
      Error::Timeout => "TIMEOUT",
      Error::Cancelled => "CANCELLED",
      Error::Shutdown => "SHUTDOWN",
      Error::Config { .. } => "CONFIG",
      Error::Pdf(_) | Error::Zip(_) => "BAD_INPUT",
      Error::Redis(_) | Error::Serialization(_) | Error::Io(_) | Error::Internal { .. } => {
        "INTERNAL"
      }
    }
  }

  /// 检查是否为可重试错误
  /// Check if the error is retriable
  pub fn is_retriable(&self) -> bool {
    matches!(
      self,
      Error::Redis(_) | Error::Io(_) | Error::Timeout | Error::StorageFull
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_creation() {
    let err = Error::bad_request("no files provided");
    assert!(matches!(err, Error::BadRequest { .. }));

    let err = Error::config("invalid MAX_FILE_SIZE");
    assert!(matches!(err, Error::Config { .. }));

    let err = Error::bad_input("invoice.pdf");
    assert!(matches!(err, Error::BadInput { .. }));
  }

  #[test]
  fn test_error_kind_codes() {
    assert_eq!(Error::Backpressure.error_kind(), "BACKPRESSURE");
    assert_eq!(Error::Timeout.error_kind(), "TIMEOUT");
    assert_eq!(Error::Cancelled.error_kind(), "CANCELLED");
    assert_eq!(Error::Shutdown.error_kind(), "SHUTDOWN");
    assert_eq!(Error::bad_input("a.pdf").error_kind(), "BAD_INPUT");
    assert_eq!(Error::oversize("zip ratio").error_kind(), "OVERSIZE");
  }

  #[test]
  fn test_error_retriable() {
    assert!(Error::Timeout.is_retriable());
    assert!(!Error::Cancelled.is_retriable());
    assert!(!Error::EmptyBatch.is_retriable());
    assert!(!Error::Backpressure.is_retriable());
  }
}
