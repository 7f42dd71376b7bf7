//! # Invoq
//!
//! Session-scoped invoice PDF imposition service core
//!
//! Invoq 接收匿名浏览器会话上传的发票 PDF（或含 PDF 的 ZIP 包），
//! 异步排队处理，把多张小票据页拼到 2×4 网格的 A4 纸上，
//! 并把合成 PDF 交还给提交它的会话。
//! Invoq accepts invoice PDFs (or ZIP archives of PDFs) uploaded by
//! anonymous browser sessions, queues them for asynchronous processing,
//! lays the small invoice pages onto A4 sheets in a 2x4 grid, and serves
//! the composite PDF back to the submitting session.
//!
//! ## 组成 / Components
//!
//! - [`impose`] — 拼版引擎，矢量保持的 Form XObject 嵌入
//!   - imposition engine with vector-preserving Form XObject embedding
//! - [`storage`] — 目录树所有权、路径防穿越、按龄清扫
//!   - directory-tree custody, traversal safety, age-based sweeps
//! - [`base`] / [`memdb`] / [`rdb`] — 任务注册表抽象与两个后端
//!   - the task registry abstraction and its two backends
//! - [`scheduler`] — 工作者池、协作取消、软硬超时、优雅排空
//!   - worker pool, cooperative cancellation, soft/hard limits, draining
//!
//! ## 快速开始 / Quick Start
//!
//! ```rust,no_run
//! use invoq::config::Config;
//! use invoq::scheduler::{Scheduler, Sweeper};
//! use invoq::storage::StorageManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 解析配置并搭建存储与注册表
//!     // Parse the configuration, set up storage and the registry
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(StorageManager::new(&config)?);
//!     let registry = invoq::connect_registry(&config).await?;
//!
//!     // 启动调度器与清扫器
//!     // Start the scheduler and the sweeper
//!     let scheduler = Arc::new(Scheduler::new(config, registry, storage));
//!     scheduler.start();
//!     Sweeper::new(Arc::clone(&scheduler)).start();
//!
//!     // ... 通过 scheduler.submit(record) 提交任务
//!     // ... submit tasks through scheduler.submit(record)
//!     Ok(())
//! }
//! ```

pub mod base;
pub mod config;
pub mod error;
pub mod impose;
pub mod memdb;
pub mod progress;
pub mod rdb;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod task;

use crate::base::Registry;
use crate::config::Config;
use crate::error::{Error, Result};
use std::sync::Arc;

/// 按 `QUEUE_URL` 选择注册表后端
/// Select the registry backend from `QUEUE_URL`
///
/// `redis://` / `rediss://` 连接 Redis，`memory://` 使用进程内后端
/// `redis://` / `rediss://` connects to Redis, `memory://` selects the
/// in-process backend
pub async fn connect_registry(config: &Config) -> Result<Arc<dyn Registry>> {
  if config.queue_url == "memory://" {
    let registry = memdb::MemoryRegistry::new()
      .with_record_ttls(config.record_ttl_completed, config.record_ttl_cancelled);
    Ok(Arc::new(registry))
  } else if config.queue_url.starts_with("redis://") || config.queue_url.starts_with("rediss://") {
    let registry = rdb::RedisRegistry::connect(&config.queue_url)
      .await?
      .with_record_ttls(config.record_ttl_completed, config.record_ttl_cancelled);
    Ok(Arc::new(registry))
  } else {
    Err(Error::config(format!(
      "unsupported QUEUE_URL: {}",
      config.queue_url
    )))
  }
}
