//! Redis 注册表实现
//! Redis registry implementation
//!
//! 记录以 JSON 存于 `task:<id>`，会话索引为 `session:<sid>:tasks` 集合；
//! 状态转换通过 Lua 脚本的比较并交换完成
//! Records live as JSON at `task:<id>` with a `session:<sid>:tasks` set as the
//! session index; status transitions go through a Lua compare-and-swap

use crate::base::keys::{session_tasks_key, task_key};
use crate::base::{stats_from_records, Registry, UpdateFields};
use crate::error::{Error, Result};
use crate::rdb::scripts;
use crate::task::{SessionStats, TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::str::FromStr;
use std::time::Duration;

/// CAS 在并发修改下的最大重试次数
/// Maximum CAS retries under concurrent modification
const CAS_MAX_ATTEMPTS: usize = 3;

/// Redis 注册表实现
/// Redis registry implementation
pub struct RedisRegistry {
  manager: ConnectionManager,
  create_script: Script,
  cas_script: Script,
  ttl_completed: Duration,
  ttl_cancelled: Duration,
  /// 会话索引键的 TTL，随每次写入刷新
  /// Session-index key TTL, refreshed on every write
  session_index_ttl: Duration,
}

impl RedisRegistry {
  /// 连接到 Redis 并准备脚本
  /// Connect to Redis and prepare the scripts
  pub async fn connect(url: &str) -> Result<Self> {
    let client = redis::Client::open(url)?;
    let manager = client.get_connection_manager().await?;
    Ok(Self {
      manager,
      create_script: Script::new(scripts::CREATE),
      cas_script: Script::new(scripts::COMPARE_AND_SWAP),
      ttl_completed: Duration::from_secs(24 * 3600),
      ttl_cancelled: Duration::from_secs(6 * 3600),
      session_index_ttl: Duration::from_secs(72 * 3600),
    })
  }

  /// 设置终态记录的保存时长
  /// Set retention of terminal records
  pub fn with_record_ttls(mut self, completed: Duration, cancelled: Duration) -> Self {
    self.ttl_completed = completed;
    self.ttl_cancelled = cancelled;
    self
  }

  /// 终态对应的键 TTL，非终态返回 0（不过期）
  /// Key TTL for a terminal status; 0 (non-expiring) for live states
  fn ttl_secs_for(&self, status: TaskStatus) -> u64 {
    match status {
      TaskStatus::Completed | TaskStatus::Failed => self.ttl_completed.as_secs(),
      TaskStatus::Expired | TaskStatus::Cancelled => self.ttl_cancelled.as_secs(),
      TaskStatus::Queued | TaskStatus::Processing => 0,
    }
  }

  /// 读取一条记录并反序列化
  /// Fetch and deserialize one record
  async fn fetch(&self, task_id: &str) -> Result<Option<TaskRecord>> {
    let mut conn = self.manager.clone();
    let raw: Option<String> = conn.get(task_key(task_id)).await?;
    match raw {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  /// 对记录执行一次比较并交换写入
  /// Perform one compare-and-swap write of a record
  async fn swap(
    &self,
    task_id: &str,
    observed: TaskStatus,
    record: &TaskRecord,
    ttl_secs: u64,
  ) -> Result<SwapOutcome> {
    let mut conn = self.manager.clone();
    let json = serde_json::to_string(record)?;
    let reply: String = self
      .cas_script
      .key(task_key(task_id))
      .arg(observed.as_str())
      .arg(json)
      .arg(ttl_secs)
      .invoke_async(&mut conn)
      .await?;
    Ok(match reply.as_str() {
      "__ok__" => SwapOutcome::Swapped,
      "__missing__" => SwapOutcome::Missing,
      other => SwapOutcome::Conflict(
        TaskStatus::from_str(other).map_err(|e| Error::internal(e))?,
      ),
    })
  }
}

enum SwapOutcome {
  Swapped,
  Missing,
  Conflict(TaskStatus),
}

#[async_trait]
impl Registry for RedisRegistry {
  async fn ping(&self) -> Result<()> {
    let mut conn = self.manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }

  async fn create(&self, record: &TaskRecord) -> Result<()> {
    let mut conn = self.manager.clone();
    let json = serde_json::to_string(record)?;
    let created: i64 = self
      .create_script
      .key(task_key(&record.task_id))
      .key(session_tasks_key(&record.session_id))
      .arg(json)
      .arg(&record.task_id)
      .arg(self.session_index_ttl.as_secs())
      .invoke_async(&mut conn)
      .await?;
    if created == 0 {
      return Err(Error::TaskExists {
        id: record.task_id.clone(),
      });
    }
    Ok(())
  }

  async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
    self.fetch(task_id).await
  }

  async fn list(&self, session_id: &str) -> Result<Vec<TaskRecord>> {
    let mut conn = self.manager.clone();
    let index_key = session_tasks_key(session_id);
    let task_ids: Vec<String> = conn.smembers(&index_key).await?;

    let mut records = Vec::with_capacity(task_ids.len());
    let mut stale = Vec::new();
    for task_id in task_ids {
      match self.fetch(&task_id).await? {
        Some(record) => records.push(record),
        // 记录已过期，顺带修剪索引
        // Record has expired, prune the index on the way
        None => stale.push(task_id),
      }
    }
    if !stale.is_empty() {
      let _: usize = conn.srem(&index_key, &stale).await?;
    }
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
    for _ in 0..CAS_MAX_ATTEMPTS {
      let mut record = self.fetch(task_id).await?.ok_or_else(|| Error::TaskNotFound {
        id: task_id.to_string(),
      })?;
      let observed = record.status;
      if !expected_from.contains(&observed) || !observed.can_transition_to(to) {
        return Err(Error::StaleState {
          task_id: task_id.to_string(),
          observed,
        });
      }

      record.status = to;
      record.updated_at = Utc::now();
      if let Some(progress) = fields.progress {
        record.progress = progress.min(100);
      }
      if let Some(stage) = fields.stage.clone() {
        record.stage = stage;
      }
      if let Some(outputs) = fields.output_refs.clone() {
        record.output_refs = outputs;
      }
      if let Some((kind, message)) = fields.error.clone() {
        record.error_kind = Some(kind);
        record.error_message = Some(message);
      }
      if let Some(completed_at) = fields.completed_at {
        record.completed_at = Some(completed_at);
      }
      if to == TaskStatus::Queued {
        record.progress = 0;
        record.stage.clear();
        record.output_refs.clear();
        record.error_kind = None;
        record.error_message = None;
        record.completed_at = None;
        record.retry_count += 1;
      }

      match self
        .swap(task_id, observed, &record, self.ttl_secs_for(to))
        .await?
      {
        SwapOutcome::Swapped => return Ok(record),
        SwapOutcome::Missing => {
          return Err(Error::TaskNotFound {
            id: task_id.to_string(),
          })
        }
        SwapOutcome::Conflict(current) => {
          tracing::debug!(task_id, observed = %observed, current = %current, "CAS conflict, retrying");
          continue;
        }
      }
    }
    let observed = self
      .fetch(task_id)
      .await?
      .map(|r| r.status)
      .unwrap_or(TaskStatus::Expired);
    Err(Error::StaleState {
      task_id: task_id.to_string(),
      observed,
    })
  }

  async fn update_progress(&self, task_id: &str, progress: u8, stage: &str) -> Result<()> {
    for _ in 0..CAS_MAX_ATTEMPTS {
      let mut record = self.fetch(task_id).await?.ok_or_else(|| Error::TaskNotFound {
        id: task_id.to_string(),
      })?;
      if record.status != TaskStatus::Processing {
        tracing::debug!(task_id, status = %record.status, "ignoring progress update for non-processing task");
        return Ok(());
      }
      let progress = progress.min(100);
      if progress < record.progress {
        tracing::debug!(
          task_id,
          current = record.progress,
          proposed = progress,
          "ignoring non-monotonic progress update"
        );
        return Ok(());
      }
      let observed = record.status;
      record.progress = progress;
      if !stage.is_empty() {
        record.stage = stage.to_string();
      }
      record.updated_at = Utc::now();

      match self.swap(task_id, observed, &record, 0).await? {
        SwapOutcome::Swapped => return Ok(()),
        // 任务同时进入了终态，进度更新作废
        // The task reached a terminal state concurrently, the update is void
        SwapOutcome::Missing | SwapOutcome::Conflict(_) => return Ok(()),
      }
    }
    Ok(())
  }

  async fn delete(&self, task_id: &str) -> Result<bool> {
    let record = self.fetch(task_id).await?;
    let mut conn = self.manager.clone();
    match record {
      Some(record) => {
        let mut pipe = redis::pipe();
        pipe
          .del(task_key(task_id))
          .srem(session_tasks_key(&record.session_id), task_id);
        let (deleted, _removed): (i64, i64) = pipe.query_async(&mut conn).await?;
        Ok(deleted > 0)
      }
      None => Ok(false),
    }
  }

  async fn statistics(&self, session_id: &str) -> Result<SessionStats> {
    let records = self.list(session_id).await?;
    Ok(stats_from_records(&records))
  }

  async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    // 记录本体由键 TTL 自动过期；这里修剪会话索引中的陈旧成员
    // Record bodies expire via key TTLs; this prunes stale session-index members
    let mut conn = self.manager.clone();
    let index_keys: Vec<String> = {
      let mut iter = conn.scan_match::<_, String>("session:*:tasks").await?;
      let mut keys = Vec::new();
      while let Some(key) = iter.next_item().await {
        keys.push(key);
      }
      keys
    };

    let mut pruned = 0;
    for index_key in index_keys {
      let task_ids: Vec<String> = conn.smembers(&index_key).await?;
      let mut stale = Vec::new();
      for task_id in task_ids {
        let exists: bool = conn.exists(task_key(&task_id)).await?;
        if !exists {
          stale.push(task_id);
        }
      }
      if !stale.is_empty() {
        let removed: usize = conn.srem(&index_key, &stale).await?;
        pruned += removed;
      }
    }
    Ok(pruned)
  }

  async fn close(&self) -> Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 需要本地 Redis；没有连接时跳过
  /// Requires a local Redis; skipped when no connection is available
  #[tokio::test]
  async fn test_redis_record_lifecycle() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let registry = match RedisRegistry::connect(&url).await {
      Ok(registry) => registry,
      Err(_) => {
        println!("Skipping test: Redis not available");
        return;
      }
    };

    let record = TaskRecord::new("redis-test-session");
    registry.create(&record).await.unwrap();
    let fetched = registry.get(&record.task_id).await.unwrap().unwrap();
    assert_eq!(fetched.status, TaskStatus::Queued);

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

    registry.update_progress(&record.task_id, 42, "rendering").await.unwrap();
    let fetched = registry.get(&record.task_id).await.unwrap().unwrap();
    assert_eq!(fetched.progress, 42);

    assert!(registry.delete(&record.task_id).await.unwrap());
  }
}
