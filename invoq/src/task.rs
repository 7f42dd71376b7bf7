//! 任务模块
//! Task module
//!
//! 定义了任务记录及其状态机
//! Defines the task record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 任务状态
/// Task status
///
/// 合法转换构成一个固定的 DAG，见 [`TaskStatus::can_transition_to`]
/// Legal transitions form a fixed DAG, see [`TaskStatus::can_transition_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  /// 任务已入队，等待工作者处理
  /// Task is enqueued, waiting for a worker
  Queued,
  /// 任务正在被某个工作者处理
  /// Task is being handled by a worker
  Processing,
  /// 任务处理成功，输出文件可下载
  /// Task finished successfully, outputs are downloadable
  Completed,
  /// 任务处理失败，错误信息已记录
  /// Task failed, error details recorded
  Failed,
  /// 任务的文件已被清理，记录仍可查询
  /// Task files were swept, the record remains queryable
  Expired,
  /// 任务被用户取消
  /// Task was cancelled by the user
  Cancelled,
}

impl TaskStatus {
  /// 将任务状态转换为字符串
  /// Convert task status to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Processing => "processing",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Expired => "expired",
      Self::Cancelled => "cancelled",
    }
  }

  /// 是否为终态
  /// Whether the status is terminal
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
    )
  }

  /// 检查到目标状态的转换是否合法
  /// Check whether a transition to the target status is legal
  pub fn can_transition_to(&self, to: TaskStatus) -> bool {
    matches!(
      (self, to),
      (Self::Queued, Self::Processing)
        | (Self::Queued, Self::Cancelled)
        | (Self::Processing, Self::Completed)
        | (Self::Processing, Self::Failed)
        | (Self::Processing, Self::Cancelled)
        | (Self::Failed, Self::Queued)
        | (Self::Completed, Self::Expired)
    )
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "queued" => Ok(Self::Queued),
      "processing" => Ok(Self::Processing),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "expired" => Ok(Self::Expired),
      "cancelled" => Ok(Self::Cancelled),
      other => Err(format!("unknown task status: {other}")),
    }
  }
}

/// 任务记录，系统的中心实体
/// Task record, the central entity of the system
///
/// 记录以 JSON 形式持久化到注册表，字段名即存储模式
/// Records persist to the registry as JSON; the field names are the stored schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
  /// 任务标识符，36 字符带连字符的 UUID
  /// Task identifier, 36-character dashed UUID
  pub task_id: String,
  /// 所属会话标识，创建后不可变
  /// Owning session tag, immutable after creation
  pub session_id: String,
  /// 当前状态
  /// Current status
  pub status: TaskStatus,
  /// 处理进度 [0, 100]，processing 期间单调不减
  /// Processing progress [0, 100], non-decreasing while processing
  pub progress: u8,
  /// 当前阶段的简短描述
  /// Short label for the current phase
  #[serde(default)]
  pub stage: String,
  /// 上传时接收的文件数量
  /// Number of files accepted at upload
  pub file_count: usize,
  /// 输入文件的存储路径，按上传顺序
  /// Storage paths of the input files, in upload order
  #[serde(default)]
  pub input_refs: Vec<String>,
  /// 成功时产生的输出文件路径
  /// Output file paths produced on success
  #[serde(default)]
  pub output_refs: Vec<String>,
  /// 失败时的错误代码
  /// Error code when failed
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_kind: Option<String>,
  /// 失败时的错误描述
  /// Error message when failed
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  /// 创建时间 (UTC)
  /// Creation time (UTC)
  pub created_at: DateTime<Utc>,
  /// 最近更新时间 (UTC)
  /// Last update time (UTC)
  pub updated_at: DateTime<Utc>,
  /// 完成时间 (UTC)
  /// Completion time (UTC)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  /// 已接受的重试次数
  /// Number of accepted retries
  #[serde(default)]
  pub retry_count: u32,
}

impl TaskRecord {
  /// 创建新的任务记录，状态为 queued
  /// Create a new task record in the queued state
  pub fn new<S: Into<String>>(session_id: S) -> Self {
    let now = Utc::now();
    Self {
      task_id: generate_task_id(),
      session_id: session_id.into(),
      status: TaskStatus::Queued,
      progress: 0,
      stage: String::new(),
      file_count: 0,
      input_refs: Vec::new(),
      output_refs: Vec::new(),
      error_kind: None,
      error_message: None,
      created_at: now,
      updated_at: now,
      completed_at: None,
      retry_count: 0,
    }
  }

  /// 设置输入文件
  /// Set the input files
  pub fn with_inputs(mut self, input_refs: Vec<String>) -> Self {
    self.file_count = input_refs.len();
    self.input_refs = input_refs;
    self
  }

  /// 标记任务完成
  /// Mark the task as completed
  pub fn mark_completed(&mut self, output_refs: Vec<String>) {
    self.status = TaskStatus::Completed;
    self.progress = 100;
    self.output_refs = output_refs;
    let now = Utc::now();
    self.completed_at = Some(now);
    self.updated_at = now;
  }

  /// 标记任务失败
  /// Mark the task as failed
  pub fn mark_failed<K: Into<String>, M: Into<String>>(&mut self, kind: K, message: M) {
    self.status = TaskStatus::Failed;
    self.error_kind = Some(kind.into());
    self.error_message = Some(message.into());
    self.updated_at = Utc::now();
  }

  /// 重试前重置记录：进度归零、回到 queued、重试计数加一
  /// Reset the record for a retry: progress back to zero, status queued, retry count bumped
  pub fn reset_for_retry(&mut self) {
    self.status = TaskStatus::Queued;
    self.progress = 0;
    self.stage.clear();
    self.output_refs.clear();
    self.error_kind = None;
    self.error_message = None;
    self.completed_at = None;
    self.retry_count += 1;
    self.updated_at = Utc::now();
  }
}

/// 会话维度的任务统计
/// Per-session task statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
  /// 任务总数
  /// Total number of tasks
  pub total: usize,
  /// 各状态的任务数
  /// Task counts per status
  pub queued: usize,
  pub processing: usize,
  pub completed: usize,
  pub failed: usize,
  pub expired: usize,
  pub cancelled: usize,
  /// 已完成任务的平均处理时长（秒）
  /// Average completion time of finished tasks, in seconds
  pub average_completion_seconds: Option<f64>,
}

/// 队列的即时快照
/// Point-in-time snapshot of the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
  /// 排队中的任务数
  /// Number of queued tasks
  pub queued: usize,
  /// 正在处理的任务数
  /// Number of tasks being processed
  pub active: usize,
  /// 队列容量上限
  /// Queue capacity high-water mark
  pub capacity: usize,
  /// 工作者数量
  /// Number of workers
  pub workers: usize,
}

/// 生成任务 ID
/// Generate a task ID
pub fn generate_task_id() -> String {
  Uuid::new_v4().to_string()
}
