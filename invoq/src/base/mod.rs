//! 注册表抽象模块
//! Registry abstraction module
//!
//! 定义了与任务存储后端交互的接口
//! Defines the interface for interacting with the task storage backend

use crate::error::Result;
use crate::task::{SessionStats, TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod constants;
pub mod keys;

/// 状态转换时一并写入的字段
/// Fields written alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
  /// 新的进度值
  /// New progress value
  pub progress: Option<u8>,
  /// 新的阶段标签
  /// New stage label
  pub stage: Option<String>,
  /// 输出文件路径
  /// Output file paths
  pub output_refs: Option<Vec<String>>,
  /// 错误代码与描述
  /// Error code and message
  pub error: Option<(String, String)>,
  /// 完成时间
  /// Completion time
  pub completed_at: Option<DateTime<Utc>>,
}

impl UpdateFields {
  /// 完成转换携带的字段
  /// Fields carried by a completion transition
  pub fn completed(output_refs: Vec<String>) -> Self {
    Self {
      progress: Some(100),
      output_refs: Some(output_refs),
      completed_at: Some(Utc::now()),
      ..Default::default()
    }
  }

  /// 失败转换携带的字段
  /// Fields carried by a failure transition
  pub fn failed<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
    Self {
      error: Some((kind.into(), message.into())),
      ..Default::default()
    }
  }
}

/// 注册表特性，任务记录的持久化接口
/// Registry trait, the persistence interface for task records
///
/// 单个任务上的状态 CAS 与进度更新是线性化的；跨任务之间不保证顺序
/// Status CAS and progress updates are linearizable per task; no ordering across tasks
#[async_trait]
pub trait Registry: Send + Sync {
  /// 检查后端连通性
  /// Check backend connectivity
  async fn ping(&self) -> Result<()>;

  /// 插入新记录并加入会话索引；ID 已存在时失败
  /// Insert a new record and add it to the session index; fails if the ID exists
  async fn create(&self, record: &TaskRecord) -> Result<()>;

  /// 按 ID 读取记录
  /// Fetch a record by ID
  async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>>;

  /// 列出会话的全部记录，最新在前
  /// List all records of a session, most recent first
  async fn list(&self, session_id: &str) -> Result<Vec<TaskRecord>>;

  /// 原子状态转换：观察到的状态必须在 `expected_from` 中，否则返回 `StaleState`
  /// Atomic status transition: the observed status must be in `expected_from`,
  /// otherwise `StaleState` is returned
  async fn update_status(
    &self,
    task_id: &str,
    expected_from: &[TaskStatus],
    to: TaskStatus,
    fields: UpdateFields,
  ) -> Result<TaskRecord>;

  /// 更新进度与阶段；小于当前值的进度被静默忽略（debug 日志）
  /// Update progress and stage; values below the current progress are silently
  /// ignored (logged at debug)
  async fn update_progress(&self, task_id: &str, progress: u8, stage: &str) -> Result<()>;

  /// 删除记录及其会话索引项
  /// Remove the record and its session-index entry
  async fn delete(&self, task_id: &str) -> Result<bool>;

  /// 会话维度的统计
  /// Per-session statistics
  async fn statistics(&self, session_id: &str) -> Result<SessionStats>;

  /// 清除已过保留期的终态记录，返回清除数量
  /// Purge terminal records past their retention, returning the purge count
  async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

  /// 关闭后端连接
  /// Close the backend connection
  async fn close(&self) -> Result<()>;
}

/// 从已完成的记录集合计算统计
/// Compute statistics from a collection of records
pub(crate) fn stats_from_records(records: &[TaskRecord]) -> SessionStats {
  let mut stats = SessionStats {
    total: records.len(),
    ..Default::default()
  };
  let mut completion_secs = Vec::new();
  for record in records {
    match record.status {
      TaskStatus::Queued => stats.queued += 1,
      TaskStatus::Processing => stats.processing += 1,
      TaskStatus::Completed => stats.completed += 1,
      TaskStatus::Failed => stats.failed += 1,
      TaskStatus::Expired => stats.expired += 1,
      TaskStatus::Cancelled => stats.cancelled += 1,
    }
    if let Some(completed_at) = record.completed_at {
      let elapsed = (completed_at - record.created_at).num_milliseconds();
      if elapsed >= 0 {
        completion_secs.push(elapsed as f64 / 1000.0);
      }
    }
  }
  if !completion_secs.is_empty() {
    stats.average_completion_seconds =
      Some(completion_secs.iter().sum::<f64>() / completion_secs.len() as f64);
  }
  stats
}
