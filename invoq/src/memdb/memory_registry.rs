//! 内存注册表实现
//! Memory registry implementation
//!
//! 使用内存数据结构保存任务记录，写锁内完成 CAS，逐键模拟 TTL
//! Keeps task records in in-memory data structures; CAS happens under the
//! write lock and TTLs are simulated per key

use crate::base::{stats_from_records, Registry, UpdateFields};
use crate::error::{Error, Result};
use crate::task::{SessionStats, TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// 带过期时间的记录
/// Record with its expiry
#[derive(Debug, Clone)]
struct StoredRecord {
  record: TaskRecord,
  /// None 表示不过期（非终态记录）
  /// None means no expiry (non-terminal records)
  expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
  fn is_live(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.map(|at| at > now).unwrap_or(true)
  }
}

/// 内存存储
/// Memory storage
#[derive(Default)]
struct MemoryStorage {
  /// 任务记录 - key: task_id
  /// Task records - key: task_id
  tasks: HashMap<String, StoredRecord>,
  /// 会话索引 - key: session_id
  /// Session index - key: session_id
  sessions: HashMap<String, HashSet<String>>,
}

/// 内存注册表实现
/// Memory registry implementation
pub struct MemoryRegistry {
  storage: Arc<RwLock<MemoryStorage>>,
  ttl_completed: Duration,
  ttl_cancelled: Duration,
}

impl Default for MemoryRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryRegistry {
  /// 创建新的内存注册表实例
  /// Create a new memory registry instance
  pub fn new() -> Self {
    Self {
      storage: Arc::new(RwLock::new(MemoryStorage::default())),
      ttl_completed: Duration::from_secs(24 * 3600),
      ttl_cancelled: Duration::from_secs(6 * 3600),
    }
  }

  /// 设置终态记录的保存时长
  /// Set retention of terminal records
  pub fn with_record_ttls(mut self, completed: Duration, cancelled: Duration) -> Self {
    self.ttl_completed = completed;
    self.ttl_cancelled = cancelled;
    self
  }

  /// 终态对应的记录 TTL
  /// Record TTL for a terminal status
  fn ttl_for(&self, status: TaskStatus) -> Option<Duration> {
    match status {
      TaskStatus::Completed | TaskStatus::Failed => Some(self.ttl_completed),
      TaskStatus::Expired | TaskStatus::Cancelled => Some(self.ttl_cancelled),
      TaskStatus::Queued | TaskStatus::Processing => None,
    }
  }
}

#[async_trait]
impl Registry for MemoryRegistry {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn create(&self, record: &TaskRecord) -> Result<()> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    if let Some(existing) = storage.tasks.get(&record.task_id) {
      if existing.is_live(now) {
        return Err(Error::TaskExists {
          id: record.task_id.clone(),
        });
      }
    }
    storage.tasks.insert(
      record.task_id.clone(),
      StoredRecord {
        record: record.clone(),
        expires_at: None,
      },
    );
    storage
      .sessions
      .entry(record.session_id.clone())
      .or_default()
      .insert(record.task_id.clone());
    Ok(())
  }

  async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
    let storage = self.storage.read().await;
    let now = Utc::now();
    Ok(
      storage
        .tasks
        .get(task_id)
        .filter(|stored| stored.is_live(now))
        .map(|stored| stored.record.clone()),
    )
  }

  async fn list(&self, session_id: &str) -> Result<Vec<TaskRecord>> {
    let storage = self.storage.read().await;
    let now = Utc::now();
    let mut records: Vec<TaskRecord> = storage
      .sessions
      .get(session_id)
      .map(|ids| {
        ids
          .iter()
          .filter_map(|id| storage.tasks.get(id))
          .filter(|stored| stored.is_live(now))
          .map(|stored| stored.record.clone())
          .collect()
      })
      .unwrap_or_default();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
  }

  async fn update_status(
    &self,
    task_id: &str,
    expected_from: &[TaskStatus],
    to: TaskStatus,
    fields: UpdateFields,
  ) -> Result<TaskRecord> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    let stored = storage
      .tasks
      .get_mut(task_id)
      .filter(|stored| stored.is_live(now))
      .ok_or_else(|| Error::TaskNotFound {
        id: task_id.to_string(),
      })?;

    let observed = stored.record.status;
    if !expected_from.contains(&observed) || !observed.can_transition_to(to) {
      return Err(Error::StaleState {
        task_id: task_id.to_string(),
        observed,
      });
    }

    stored.record.status = to;
    stored.record.updated_at = now;
    if let Some(progress) = fields.progress {
      stored.record.progress = progress.min(100);
    }
    if let Some(stage) = fields.stage {
      stored.record.stage = stage;
    }
    if let Some(outputs) = fields.output_refs {
      stored.record.output_refs = outputs;
    }
    if let Some((kind, message)) = fields.error {
      stored.record.error_kind = Some(kind);
      stored.record.error_message = Some(message);
    }
    if let Some(completed_at) = fields.completed_at {
      stored.record.completed_at = Some(completed_at);
    }
    if to == TaskStatus::Queued {
      // 重试路径：清空上次运行的残留字段
      // Retry path: clear leftovers from the previous run
      stored.record.progress = 0;
      stored.record.stage.clear();
      stored.record.output_refs.clear();
      stored.record.error_kind = None;
      stored.record.error_message = None;
      stored.record.completed_at = None;
      stored.record.retry_count += 1;
      stored.expires_at = None;
    }
    if let Some(ttl) = self.ttl_for(to) {
      stored.expires_at = Some(now + chrono::Duration::from_std(ttl).unwrap_or_default());
    }
    Ok(stored.record.clone())
  }

  async fn update_progress(&self, task_id: &str, progress: u8, stage: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    let stored = storage
      .tasks
      .get_mut(task_id)
      .filter(|stored| stored.is_live(now))
      .ok_or_else(|| Error::TaskNotFound {
        id: task_id.to_string(),
      })?;

    if stored.record.status != TaskStatus::Processing {
      tracing::debug!(
        task_id,
        status = %stored.record.status,
        "ignoring progress update for non-processing task"
      );
      return Ok(());
    }
    let progress = progress.min(100);
    if progress < stored.record.progress {
      tracing::debug!(
        task_id,
        current = stored.record.progress,
        proposed = progress,
        "ignoring non-monotonic progress update"
      );
      return Ok(());
    }
    stored.record.progress = progress;
    if !stage.is_empty() {
      stored.record.stage = stage.to_string();
    }
    stored.record.updated_at = now;
    Ok(())
  }

  async fn delete(&self, task_id: &str) -> Result<bool> {
    let mut storage = self.storage.write().await;
    let removed = storage.tasks.remove(task_id);
    if let Some(stored) = &removed {
      if let Some(ids) = storage.sessions.get_mut(&stored.record.session_id) {
        ids.remove(task_id);
        if ids.is_empty() {
          storage.sessions.remove(&stored.record.session_id);
        }
      }
    }
    Ok(removed.is_some())
  }

  async fn statistics(&self, session_id: &str) -> Result<SessionStats> {
    let records = self.list(session_id).await?;
    Ok(stats_from_records(&records))
  }

  async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let mut storage = self.storage.write().await;
    let dead: Vec<(String, String)> = storage
      .tasks
      .iter()
      .filter(|(_, stored)| !stored.is_live(now))
      .map(|(id, stored)| (id.clone(), stored.record.session_id.clone()))
      .collect();
    for (task_id, session_id) in &dead {
      storage.tasks.remove(task_id);
      if let Some(ids) = storage.sessions.get_mut(session_id) {
        ids.remove(task_id);
        if ids.is_empty() {
          storage.sessions.remove(session_id);
        }
      }
    }
    Ok(dead.len())
  }

  async fn close(&self) -> Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_and_get() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("session-a");
    registry.create(&record).await.unwrap();

    let fetched = registry.get(&record.task_id).await.unwrap().unwrap();
    assert_eq!(fetched.task_id, record.task_id);
    assert_eq!(fetched.status, TaskStatus::Queued);

    // 重复创建同一 ID 被拒绝
    // Creating the same ID twice is rejected
    assert!(matches!(
      registry.create(&record).await,
      Err(Error::TaskExists { .. })
    ));
  }

  #[tokio::test]
  async fn test_get_missing_task() {
    let registry = MemoryRegistry::new();
    assert!(registry.get("nope").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_list_newest_first() {
    let registry = MemoryRegistry::new();
    let mut older = TaskRecord::new("s");
    older.created_at = Utc::now() - chrono::Duration::minutes(5);
    let newer = TaskRecord::new("s");
    registry.create(&older).await.unwrap();
    registry.create(&newer).await.unwrap();

    let listed = registry.list("s").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].task_id, newer.task_id);
  }

  #[tokio::test]
  async fn test_cas_transition() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();

    let updated = registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Processing,
        UpdateFields::default(),
      )
      .await
      .unwrap();
    assert_eq!(updated.status, TaskStatus::Processing);

    // 第二次 CAS 观察到 processing，不在预期集合内
    // A second CAS observes processing, outside the expected set
    let stale = registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Processing,
        UpdateFields::default(),
      )
      .await;
    assert!(matches!(stale, Err(Error::StaleState { .. })));
  }

  #[tokio::test]
  async fn test_illegal_transition_rejected() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();

    let result = registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Completed,
        UpdateFields::default(),
      )
      .await;
    assert!(matches!(result, Err(Error::StaleState { .. })));
  }

  #[tokio::test]
  async fn test_progress_monotonic() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();
    registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Processing,
        UpdateFields::default(),
      )
      .await
      .unwrap();

    registry
      .update_progress(&record.task_id, 40, "rendering page 3/8")
      .await
      .unwrap();
    registry.update_progress(&record.task_id, 20, "").await.unwrap();

    let fetched = registry.get(&record.task_id).await.unwrap().unwrap();
    assert_eq!(fetched.progress, 40);
    assert_eq!(fetched.stage, "rendering page 3/8");
  }

  #[tokio::test]
  async fn test_progress_ignored_after_cancel() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();
    registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Cancelled,
        UpdateFields::default(),
      )
      .await
      .unwrap();

    registry.update_progress(&record.task_id, 80, "late").await.unwrap();
    let fetched = registry.get(&record.task_id).await.unwrap().unwrap();
    assert_eq!(fetched.progress, 0);
    assert_eq!(fetched.status, TaskStatus::Cancelled);
  }

  #[tokio::test]
  async fn test_retry_resets_record() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();
    registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Processing,
        UpdateFields::default(),
      )
      .await
      .unwrap();
    registry.update_progress(&record.task_id, 50, "rendering").await.unwrap();
    registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Processing],
        TaskStatus::Failed,
        UpdateFields::failed("BAD_INPUT", "unreadable"),
      )
      .await
      .unwrap();

    let retried = registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Failed],
        TaskStatus::Queued,
        UpdateFields::default(),
      )
      .await
      .unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.progress, 0);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error_kind.is_none());
  }

  #[tokio::test]
  async fn test_record_ttl_expiry() {
    let registry =
      MemoryRegistry::new().with_record_ttls(Duration::from_secs(0), Duration::from_secs(0));
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();
    registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Cancelled,
        UpdateFields::default(),
      )
      .await
      .unwrap();

    // TTL 为零的终态记录立刻视为不存在
    // A terminal record with zero TTL is immediately gone
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(registry.get(&record.task_id).await.unwrap().is_none());
    let purged = registry.purge_expired(Utc::now()).await.unwrap();
    assert_eq!(purged, 1);
  }

  #[tokio::test]
  async fn test_delete_removes_index() {
    let registry = MemoryRegistry::new();
    let record = TaskRecord::new("s");
    registry.create(&record).await.unwrap();
    assert!(registry.delete(&record.task_id).await.unwrap());
    assert!(!registry.delete(&record.task_id).await.unwrap());
    assert!(registry.list("s").await.unwrap().is_empty());
  }
}
