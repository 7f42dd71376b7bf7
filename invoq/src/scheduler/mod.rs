//! 调度器模块
//! Scheduler module
//!
//! 固定大小的工作者池从 FIFO 队列拉取任务：CAS 认领、进度回报、
//! 软硬超时、协作取消、优雅排空
//! A fixed pool of workers pulls tasks from a FIFO queue: CAS claiming,
//! progress reporting, soft/hard time limits, cooperative cancellation and
//! graceful draining

mod queue;
mod sweeper;
mod worker;

pub use queue::{QueueEntry, TaskQueue};
pub use sweeper::Sweeper;
pub use worker::{execute_job, LiveProgress, WorkerContext};

use crate::base::{Registry, UpdateFields};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::impose::LayoutConfig;
use crate::progress::ProgressSnapshot;
use crate::storage::{StorageManager, SweepReport};
use crate::task::{QueueSnapshot, TaskRecord, TaskStatus};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 任务取消追踪结构
/// Task cancellation tracking structure
///
/// 正在运行的任务与其取消令牌的映射
/// Maps in-flight tasks to their cancellation tokens
#[derive(Clone, Default)]
pub struct CancellationMap {
  tasks: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancellationMap {
  /// 创建新的映射
  /// Create a new map
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册任务的取消令牌
  /// Register a task's cancellation token
  pub fn add(&self, task_id: String, token: CancellationToken) {
    self.tasks.lock().unwrap().insert(task_id, token);
  }

  /// 移除任务的取消令牌
  /// Remove a task's cancellation token
  pub fn remove(&self, task_id: &str) {
    self.tasks.lock().unwrap().remove(task_id);
  }

  /// 向指定任务发出取消信号
  /// Signal cancellation for the given task
  pub fn cancel(&self, task_id: &str) -> bool {
    let tasks = self.tasks.lock().unwrap();
    if let Some(token) = tasks.get(task_id) {
      tracing::info!(task_id, "signalling cancellation");
      token.cancel();
      true
    } else {
      false
    }
  }

  /// 活跃任务数量
  /// Number of in-flight tasks
  pub fn len(&self) -> usize {
    self.tasks.lock().unwrap().len()
  }

  /// 是否为空
  /// Whether the map is empty
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 活跃任务的 ID 集合
  /// IDs of the in-flight tasks
  pub fn task_ids(&self) -> Vec<String> {
    self.tasks.lock().unwrap().keys().cloned().collect()
  }
}

/// 取消请求的结果
/// Outcome of a cancel request
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
  /// 任务已转入 cancelled
  /// The task transitioned to cancelled
  Cancelled,
  /// 任务已处于终态，取消是无操作
  /// The task was already terminal, the cancel is a no-op
  NoOp(TaskStatus),
}

/// 调度器：队列、工作者池与清理扫描的拥有者
/// Scheduler: owner of the queue, the worker pool and the cleanup sweep
pub struct Scheduler {
  config: Arc<Config>,
  registry: Arc<dyn Registry>,
  storage: Arc<StorageManager>,
  layout: Arc<LayoutConfig>,
  queue: Arc<TaskQueue>,
  cancellations: CancellationMap,
  live: LiveProgress,
  shutdown: CancellationToken,
  workers: Mutex<Vec<JoinHandle<()>>>,
  active_workers: Arc<AtomicUsize>,
}

impl Scheduler {
  /// 创建调度器
  /// Create the scheduler
  pub fn new(config: Config, registry: Arc<dyn Registry>, storage: Arc<StorageManager>) -> Self {
    let queue = Arc::new(TaskQueue::new(config.queue_capacity, config.fair_scheduling));
    Self {
      config: Arc::new(config),
      registry,
      storage,
      layout: Arc::new(LayoutConfig::default()),
      queue,
      cancellations: CancellationMap::new(),
      live: Arc::new(Mutex::new(HashMap::new())),
      shutdown: CancellationToken::new(),
      workers: Mutex::new(Vec::new()),
      active_workers: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// 覆盖版面配置
  /// Override the layout configuration
  pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
    self.layout = Arc::new(layout);
    self
  }

  /// 启动工作者池
  /// Start the worker pool
  pub fn start(self: &Arc<Self>) {
    let mut workers = self.workers.lock().unwrap();
    if !workers.is_empty() {
      return;
    }
    for worker_id in 0..self.config.max_concurrent_tasks {
      let scheduler = Arc::clone(self);
      workers.push(tokio::spawn(async move {
        // 处理满一批后回收循环，限制单个工作者的内存增长
        // The loop is recycled after a full batch to bound per-worker
        // memory growth
        loop {
          let finished = scheduler.worker_batch(worker_id).await;
          if finished {
            break;
          }
          tracing::debug!(worker_id, "recycling worker loop");
        }
        tracing::debug!(worker_id, "worker exited");
      }));
    }
    tracing::info!(workers = self.config.max_concurrent_tasks, "worker pool started");
  }

  /// 处理至多一批任务；返回 true 表示收到关停信号
  /// Process at most one batch of tasks; true means shutdown was observed
  async fn worker_batch(self: &Arc<Self>, worker_id: usize) -> bool {
    let mut jobs_done = 0usize;
    while jobs_done < self.config.worker_recycle_jobs {
      let Some(entry) = self.queue.dequeue(&self.shutdown).await else {
        return true;
      };
      self.process_one(worker_id, entry).await;
      jobs_done += 1;
    }
    false
  }

  /// 处理单个队列条目
  /// Process a single queue entry
  async fn process_one(&self, worker_id: usize, entry: QueueEntry) {
    // 认领：queued → processing；冲突说明任务已被取消或删除
    // Claim: queued -> processing; a conflict means the task was cancelled
    // or deleted meanwhile
    let record = match self
      .registry
      .update_status(
        &entry.task_id,
        &[TaskStatus::Queued],
        TaskStatus::Processing,
        UpdateFields::default(),
      )
      .await
    {
      Ok(record) => record,
      Err(Error::StaleState { observed, .. }) => {
        tracing::debug!(task_id = %entry.task_id, %observed, "skipping stale queue entry");
        return;
      }
      Err(Error::TaskNotFound { .. }) => {
        tracing::debug!(task_id = %entry.task_id, "skipping vanished queue entry");
        return;
      }
      Err(error) => {
        tracing::error!(task_id = %entry.task_id, %error, "failed to claim task");
        return;
      }
    };

    let cancel = CancellationToken::new();
    self.cancellations.add(entry.task_id.clone(), cancel.clone());
    self.active_workers.fetch_add(1, Ordering::Relaxed);
    tracing::info!(worker_id, task_id = %entry.task_id, "processing task");

    let ctx = WorkerContext {
      registry: Arc::clone(&self.registry),
      storage: Arc::clone(&self.storage),
      config: Arc::clone(&self.config),
      layout: Arc::clone(&self.layout),
      live: Arc::clone(&self.live),
    };

    let soft = self.config.soft_time_limit;
    let hard = self.config.hard_time_limit;
    let result = {
      let job = execute_job(&ctx, &record, cancel.clone());
      tokio::pin!(job);
      tokio::select! {
        result = &mut job => result,
        _ = tokio::time::sleep(soft) => {
          tracing::warn!(task_id = %entry.task_id, ?soft, "soft time limit reached, signalling worker");
          cancel.cancel();
          tokio::select! {
            result = &mut job => result,
            _ = tokio::time::sleep(hard.saturating_sub(soft)) => {
              tracing::error!(task_id = %entry.task_id, ?hard, "hard time limit reached, abandoning work unit");
              Err(Error::Timeout)
            }
          }
        }
      }
    };

    self.cancellations.remove(&entry.task_id);
    ctx.clear_live(&entry.task_id);
    self.active_workers.fetch_sub(1, Ordering::Relaxed);

    self.finish(&entry, record, result).await;
  }

  /// 根据执行结果写入终态
  /// Write the terminal state according to the execution result
  async fn finish(&self, entry: &QueueEntry, record: TaskRecord, result: Result<Vec<String>>) {
    let task_id = entry.task_id.as_str();
    match result {
      Ok(output_refs) => {
        match self
          .registry
          .update_status(
            task_id,
            &[TaskStatus::Processing],
            TaskStatus::Completed,
            UpdateFields::completed(output_refs),
          )
          .await
        {
          Ok(_) => tracing::info!(task_id, "task completed"),
          Err(Error::StaleState { observed, .. }) => {
            // 取消在完成前抢先落地；输出不能留下
            // A cancel landed before completion; the output must not survive
            tracing::info!(task_id, %observed, "completion lost the race, purging output");
            self.purge_quiet(&record);
          }
          Err(error) => tracing::error!(task_id, %error, "failed to mark task completed"),
        }
      }
      Err(Error::Cancelled) if !self.shutdown.is_cancelled() => {
        let _ = self
          .registry
          .update_status(
            task_id,
            &[TaskStatus::Processing],
            TaskStatus::Cancelled,
            UpdateFields::default(),
          )
          .await;
        self.purge_quiet(&record);
        tracing::info!(task_id, "task cancelled");
      }
      Err(error) => {
        // 关停期间的取消按 Shutdown 记账
        // Cancellations during shutdown are accounted as Shutdown
        let error = match error {
          Error::Cancelled => Error::Shutdown,
          other => other,
        };
        let kind = error.error_kind().to_string();
        let message = error.to_string();
        let _ = self
          .registry
          .update_status(
            task_id,
            &[TaskStatus::Processing],
            TaskStatus::Failed,
            UpdateFields::failed(kind.clone(), message.clone()),
          )
          .await;
        if let Err(error) = self.storage.remove_temp(task_id) {
          tracing::warn!(task_id, %error, "failed to remove temp directory");
        }
        tracing::warn!(task_id, kind = %kind, %message, "task failed");
      }
    }
  }

  fn purge_quiet(&self, record: &TaskRecord) {
    if let Err(error) = self.storage.purge(&record.session_id, &record.task_id) {
      tracing::warn!(task_id = %record.task_id, %error, "failed to purge task objects");
    }
  }

  /// 准入检查：队列到达高水位时返回 `Backpressure`
  /// Admission check: returns `Backpressure` at the queue high-water mark
  pub fn admit(&self) -> Result<()> {
    if self.shutdown.is_cancelled() {
      return Err(Error::Shutdown);
    }
    if self.queue.is_full() {
      return Err(Error::Backpressure);
    }
    Ok(())
  }

  /// 记录并入队一个新任务
  /// Record and enqueue a new task
  pub async fn submit(&self, record: TaskRecord) -> Result<()> {
    self.admit()?;
    self.registry.create(&record).await?;
    let entry = QueueEntry {
      task_id: record.task_id.clone(),
      session_id: record.session_id.clone(),
    };
    if let Err(error) = self.queue.enqueue(entry) {
      // 录入与入队之间队列被塞满；撤销记录，文件由调用方清理
      // The queue filled between recording and enqueueing; undo the record,
      // the caller cleans up the files
      let _ = self.registry.delete(&record.task_id).await;
      return Err(error);
    }
    Ok(())
  }

  /// 取消任务；对终态任务是无操作
  /// Cancel a task; a no-op for terminal tasks
  pub async fn cancel(&self, record: &TaskRecord) -> Result<CancelOutcome> {
    match record.status {
      TaskStatus::Queued => {
        self.queue.remove(&record.task_id);
        match self
          .registry
          .update_status(
            &record.task_id,
            &[TaskStatus::Queued],
            TaskStatus::Cancelled,
            UpdateFields::default(),
          )
          .await
        {
          Ok(_) => {
            self.purge_quiet(record);
            Ok(CancelOutcome::Cancelled)
          }
          Err(Error::StaleState { observed, .. }) => Ok(CancelOutcome::NoOp(observed)),
          Err(error) => Err(error),
        }
      }
      TaskStatus::Processing => {
        // CAS 先落地，工作者在下一个检查点观察到信号；
        // 与同时完成的竞争由 CAS 胜负裁决
        // The CAS lands first and the worker observes the signal at its next
        // checkpoint; the race against a simultaneous completion is settled
        // by whichever CAS wins
        match self
          .registry
          .update_status(
            &record.task_id,
            &[TaskStatus::Processing],
            TaskStatus::Cancelled,
            UpdateFields::default(),
          )
          .await
        {
          Ok(_) => {
            self.cancellations.cancel(&record.task_id);
            self.purge_quiet(record);
            Ok(CancelOutcome::Cancelled)
          }
          Err(Error::StaleState { observed, .. }) => Ok(CancelOutcome::NoOp(observed)),
          Err(error) => Err(error),
        }
      }
      terminal => Ok(CancelOutcome::NoOp(terminal)),
    }
  }

  /// 重试失败任务：记录重置、复用原输入、重新入队
  /// Retry a failed task: the record resets, the original inputs are reused
  /// and the task re-enqueues
  pub async fn retry(&self, record: &TaskRecord) -> Result<TaskRecord> {
    if record.status != TaskStatus::Failed {
      return Err(Error::StaleState {
        task_id: record.task_id.clone(),
        observed: record.status,
      });
    }
    self.admit()?;
    let reset = self
      .registry
      .update_status(
        &record.task_id,
        &[TaskStatus::Failed],
        TaskStatus::Queued,
        UpdateFields::default(),
      )
      .await?;
    self.queue.enqueue_unchecked(QueueEntry {
      task_id: reset.task_id.clone(),
      session_id: reset.session_id.clone(),
    });
    Ok(reset)
  }

  /// 确保一个 queued 任务在队列中（重启后补挂）
  /// Ensure a queued task sits in the queue (re-attach after a restart)
  pub fn ensure_enqueued(&self, record: &TaskRecord) -> Result<()> {
    if record.status != TaskStatus::Queued {
      return Err(Error::StaleState {
        task_id: record.task_id.clone(),
        observed: record.status,
      });
    }
    if !self.queue.contains(&record.task_id) {
      self.queue.enqueue_unchecked(QueueEntry {
        task_id: record.task_id.clone(),
        session_id: record.session_id.clone(),
      });
    }
    Ok(())
  }

  /// 队列快照
  /// Queue snapshot
  pub fn queue_snapshot(&self) -> QueueSnapshot {
    QueueSnapshot {
      queued: self.queue.len(),
      active: self.active_workers.load(Ordering::Relaxed),
      capacity: self.queue.capacity(),
      workers: self.config.max_concurrent_tasks,
    }
  }

  /// 活跃任务的实时进度估计
  /// Live progress estimate of an active task
  pub fn live_progress(&self, task_id: &str) -> Option<ProgressSnapshot> {
    self.live.lock().unwrap().get(task_id).cloned()
  }

  /// 被工作者或队列持有的任务集合；清扫时跳过
  /// Tasks held by a worker or the queue; skipped by the sweep
  pub fn active_task_ids(&self) -> HashSet<String> {
    let mut ids: HashSet<String> = self.cancellations.task_ids().into_iter().collect();
    ids.extend(self.queue.task_ids());
    ids
  }

  /// 执行一轮清理：先删老文件，再把文件已失的 completed 记录降为 expired
  /// Run one cleanup round: delete aged files first, then demote completed
  /// records whose files are gone to expired
  pub async fn run_sweep_once(&self) -> Result<SweepReport> {
    let cutoff = std::time::SystemTime::now() - self.config.retention;
    let active = self.active_task_ids();
    let report = self.storage.sweep(cutoff, &active)?;

    for task_id in &report.affected_tasks {
      match self.registry.get(task_id).await {
        Ok(Some(record)) if record.status == TaskStatus::Completed => {
          if let Err(error) = self
            .registry
            .update_status(
              task_id,
              &[TaskStatus::Completed],
              TaskStatus::Expired,
              UpdateFields::default(),
            )
            .await
          {
            tracing::warn!(%task_id, %error, "failed to expire swept task");
          }
        }
        _ => {}
      }
    }

    let purged = self.registry.purge_expired(chrono::Utc::now()).await?;
    if purged > 0 {
      tracing::debug!(purged, "purged expired registry records");
    }
    Ok(report)
  }

  /// 清扫周期
  /// Sweep cadence
  pub fn cleanup_interval(&self) -> Duration {
    self.config.cleanup_interval
  }

  /// 关停信号的令牌
  /// Token carrying the shutdown signal
  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// 是否仍在运行
  /// Whether the scheduler is still running
  pub fn is_running(&self) -> bool {
    !self.shutdown.is_cancelled()
  }

  /// 优雅关停：停止接收，排空至截止时间，残余任务记为 Shutdown 失败
  /// Graceful shutdown: stop intake, drain until the deadline, account
  /// leftovers as Shutdown failures
  pub async fn shutdown(&self) {
    if self.shutdown.is_cancelled() {
      return;
    }
    tracing::info!("scheduler shutting down, draining active workers");
    self.shutdown.cancel();

    let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
    while !self.cancellations.is_empty() && tokio::time::Instant::now() < deadline {
      tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !self.cancellations.is_empty() {
      tracing::warn!(
        remaining = self.cancellations.len(),
        "drain deadline reached, cancelling stragglers"
      );
      for task_id in self.cancellations.task_ids() {
        self.cancellations.cancel(&task_id);
      }
      tokio::time::sleep(Duration::from_millis(500)).await;
      for task_id in self.cancellations.task_ids() {
        let _ = self
          .registry
          .update_status(
            &task_id,
            &[TaskStatus::Processing],
            TaskStatus::Failed,
            UpdateFields::failed("SHUTDOWN", "server shutting down"),
          )
          .await;
      }
    }

    let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
    for handle in handles {
      if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
        tracing::warn!("worker did not exit within the join grace period");
      }
    }
    tracing::info!("scheduler stopped");
  }
}
