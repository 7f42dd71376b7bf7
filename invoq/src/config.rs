//! 配置模块
//! Configuration module
//!
//! 配置在启动时从环境变量解析一次，之后视为不可变
//! Configuration is parsed from environment variables once at startup and treated as immutable

use crate::base::constants::{DEFAULT_MAX_FILE_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// 服务配置
/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
  /// uploads/outputs/temp 的基础目录
  /// Base directory for uploads/outputs/temp
  pub storage_root: PathBuf,
  /// 任务队列位置，`redis://…` 或 `memory://`
  /// Task queue location, `redis://…` or `memory://`
  pub queue_url: String,
  /// 单个上传文件的字节上限
  /// Per-file upload cap in bytes
  pub max_file_size: u64,
  /// 工作者数量
  /// Worker pool size
  pub max_concurrent_tasks: usize,
  /// 队列容量（高水位），满则拒绝接收
  /// Queue capacity (high-water mark); admission refused when full
  pub queue_capacity: usize,
  /// 是否按会话轮转出队
  /// Whether to dequeue round-robin per session
  pub fair_scheduling: bool,
  /// 清理扫描周期
  /// Sweep cadence
  pub cleanup_interval: Duration,
  /// 文件保留期限
  /// File retention horizon
  pub retention: Duration,
  /// 软超时：到达后向工作者发出协作取消信号
  /// Soft limit: signals the worker cooperatively when reached
  pub soft_time_limit: Duration,
  /// 硬超时：到达后强制终止工作单元并标记失败
  /// Hard limit: forcibly terminates the work unit and marks the task failed
  pub hard_time_limit: Duration,
  /// 优雅关停时等待活跃工作者的最长时间
  /// Maximum wait for active workers during graceful shutdown
  pub drain_timeout: Duration,
  /// 每个工作者处理多少任务后回收其循环
  /// Jobs per worker before its loop is recycled
  pub worker_recycle_jobs: usize,
  /// 合成内存估算的上限（字节）
  /// Ceiling for the composition memory estimate, in bytes
  pub compose_memory_ceiling: u64,
  /// ZIP 解压的绝对字节上限
  /// Absolute decompressed-size ceiling for ZIP extraction
  pub zip_max_decompressed: u64,
  /// ZIP 压缩比上限
  /// Maximum ZIP compression ratio
  pub zip_max_ratio: u64,
  /// 终态记录的保存时长
  /// Retention of terminal records
  pub record_ttl_completed: Duration,
  pub record_ttl_cancelled: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      storage_root: PathBuf::from("./storage"),
      queue_url: "memory://".to_string(),
      max_file_size: DEFAULT_MAX_FILE_SIZE,
      max_concurrent_tasks: DEFAULT_WORKERS,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      fair_scheduling: false,
      cleanup_interval: Duration::from_secs(6 * 3600),
      retention: Duration::from_secs(24 * 3600),
      soft_time_limit: Duration::from_secs(55 * 60),
      hard_time_limit: Duration::from_secs(60 * 60),
      drain_timeout: Duration::from_secs(30),
      worker_recycle_jobs: 32,
      compose_memory_ceiling: 512 * 1024 * 1024,
      zip_max_decompressed: 512 * 1024 * 1024,
      zip_max_ratio: 100,
      record_ttl_completed: Duration::from_secs(24 * 3600),
      record_ttl_cancelled: Duration::from_secs(6 * 3600),
    }
  }
}

impl Config {
  /// 从环境变量加载配置
  /// Load configuration from environment variables
  pub fn from_env() -> Result<Self> {
    let mut config = Self::default();

    if let Ok(root) = std::env::var("STORAGE_ROOT") {
      config.storage_root = PathBuf::from(root);
    }
    if let Ok(url) = std::env::var("QUEUE_URL") {
      if !url.starts_with("redis://") && !url.starts_with("rediss://") && url != "memory://" {
        return Err(Error::config(format!(
          "QUEUE_URL must be redis://, rediss:// or memory://, got {url}"
        )));
      }
      config.queue_url = url;
    }
    if let Some(v) = parse_var::<u64>("MAX_FILE_SIZE")? {
      if v < 1024 {
        return Err(Error::config("MAX_FILE_SIZE must be at least 1024 bytes"));
      }
      config.max_file_size = v;
    }
    if let Some(v) = parse_var::<usize>("MAX_CONCURRENT_TASKS")? {
      if v == 0 || v > 32 {
        return Err(Error::config("MAX_CONCURRENT_TASKS must be in 1..=32"));
      }
      config.max_concurrent_tasks = v;
    }
    if let Some(v) = parse_var::<usize>("QUEUE_CAPACITY")? {
      config.queue_capacity = v.max(1);
    }
    if let Some(v) = parse_var::<u64>("CLEANUP_INTERVAL_HOURS")? {
      config.cleanup_interval = Duration::from_secs(v * 3600);
    }
    if let Some(v) = parse_var::<u64>("RETENTION_HOURS")? {
      config.retention = Duration::from_secs(v * 3600);
    }
    if let Some(v) = parse_var::<u64>("SOFT_TIME_LIMIT_SECONDS")? {
      config.soft_time_limit = Duration::from_secs(v);
    }
    if let Some(v) = parse_var::<u64>("HARD_TIME_LIMIT_SECONDS")? {
      config.hard_time_limit = Duration::from_secs(v);
    }
    if let Some(v) = parse_var::<u64>("DRAIN_TIMEOUT_SECONDS")? {
      config.drain_timeout = Duration::from_secs(v);
    }
    if let Some(v) = parse_var::<usize>("WORKER_RECYCLE_JOBS")? {
      config.worker_recycle_jobs = v.max(1);
    }
    if let Ok(v) = std::env::var("FAIR_SCHEDULING") {
      config.fair_scheduling = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }

    config.validate()?;
    Ok(config)
  }

  /// 校验配置的内部一致性
  /// Validate internal consistency of the configuration
  pub fn validate(&self) -> Result<()> {
    if self.soft_time_limit >= self.hard_time_limit {
      return Err(Error::config(
        "SOFT_TIME_LIMIT_SECONDS must be smaller than HARD_TIME_LIMIT_SECONDS",
      ));
    }
    if self.storage_root.as_os_str().is_empty() {
      return Err(Error::config("STORAGE_ROOT must not be empty"));
    }
    Ok(())
  }
}

/// 读取并解析一个可选的环境变量
/// Read and parse an optional environment variable
fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
  match std::env::var(name) {
    Ok(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| Error::config(format!("invalid value for {name}: {raw}"))),
    Err(_) => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.max_concurrent_tasks, 4);
    assert_eq!(config.max_file_size, 50 * 1024 * 1024);
    assert_eq!(config.retention, Duration::from_secs(24 * 3600));
    assert_eq!(config.cleanup_interval, Duration::from_secs(6 * 3600));
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_time_limit_ordering() {
    let mut config = Config::default();
    config.soft_time_limit = Duration::from_secs(120);
    config.hard_time_limit = Duration::from_secs(60);
    assert!(config.validate().is_err());
  }
}
