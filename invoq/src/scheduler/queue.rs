//! 任务队列模块
//! Task queue module
//!
//! 进程内 FIFO 队列：容量高水位、支持取消移除、可选按会话轮转
//! In-process FIFO queue: capacity high-water mark, removal for cancellation,
//! optional per-session round-robin

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// 队列条目
/// Queue entry
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
  pub task_id: String,
  pub session_id: String,
}

struct QueueState {
  entries: VecDeque<QueueEntry>,
  /// 公平模式下最近服务过的会话
  /// Session served most recently in fair mode
  last_session: Option<String>,
}

/// 任务队列
/// Task queue
pub struct TaskQueue {
  state: Mutex<QueueState>,
  notify: Notify,
  capacity: usize,
  fair: bool,
}

impl TaskQueue {
  /// 创建队列
  /// Create the queue
  pub fn new(capacity: usize, fair: bool) -> Self {
    Self {
      state: Mutex::new(QueueState {
        entries: VecDeque::new(),
        last_session: None,
      }),
      notify: Notify::new(),
      capacity: capacity.max(1),
      fair,
    }
  }

  /// 当前长度
  /// Current length
  pub fn len(&self) -> usize {
    self.state.lock().unwrap().entries.len()
  }

  /// 是否为空
  /// Whether the queue is empty
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 是否已到容量高水位
  /// Whether the capacity high-water mark has been reached
  pub fn is_full(&self) -> bool {
    self.len() >= self.capacity
  }

  /// 容量高水位
  /// Capacity high-water mark
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 入队；到达高水位时拒绝
  /// Enqueue; refused at the high-water mark
  pub fn enqueue(&self, entry: QueueEntry) -> Result<()> {
    {
      let mut state = self.state.lock().unwrap();
      if state.entries.len() >= self.capacity {
        return Err(Error::Backpressure);
      }
      state.entries.push_back(entry);
    }
    self.notify.notify_one();
    Ok(())
  }

  /// 无条件入队，用于重试等已越过准入检查的路径；
  /// 容量是高水位而非硬上限，短暂超出可以接受
  /// Unchecked enqueue for paths that already passed admission (retry);
  /// the capacity is a high-water mark, not a hard cap, so a brief
  /// overshoot is acceptable
  pub fn enqueue_unchecked(&self, entry: QueueEntry) {
    self.state.lock().unwrap().entries.push_back(entry);
    self.notify.notify_one();
  }

  /// 队列中是否包含某个任务
  /// Whether the queue contains a task
  pub fn contains(&self, task_id: &str) -> bool {
    self
      .state
      .lock()
      .unwrap()
      .entries
      .iter()
      .any(|entry| entry.task_id == task_id)
  }

  /// 队列中全部任务的 ID
  /// IDs of every task in the queue
  pub fn task_ids(&self) -> Vec<String> {
    self
      .state
      .lock()
      .unwrap()
      .entries
      .iter()
      .map(|entry| entry.task_id.clone())
      .collect()
  }

  /// 移除一个排队中的任务（取消路径）
  /// Remove a queued task (cancellation path)
  pub fn remove(&self, task_id: &str) -> bool {
    let mut state = self.state.lock().unwrap();
    let before = state.entries.len();
    state.entries.retain(|entry| entry.task_id != task_id);
    state.entries.len() < before
  }

  /// 出队；队列为空时等待，关停信号到达时返回 None
  /// Dequeue; waits while the queue is empty and returns None on shutdown
  pub async fn dequeue(&self, shutdown: &CancellationToken) -> Option<QueueEntry> {
    loop {
      if shutdown.is_cancelled() {
        return None;
      }
      if let Some(entry) = self.pop() {
        return Some(entry);
      }
      tokio::select! {
        _ = self.notify.notified() => {}
        _ = shutdown.cancelled() => return None,
      }
    }
  }

  fn pop(&self) -> Option<QueueEntry> {
    let mut state = self.state.lock().unwrap();
    if state.entries.is_empty() {
      return None;
    }
    let index = if self.fair {
      // 优先挑一个不同于上次服务会话的条目，没有则取队首
      // Prefer the first entry from a session other than the last served;
      // fall back to the front
      match &state.last_session {
        Some(last) => state
          .entries
          .iter()
          .position(|entry| &entry.session_id != last)
          .unwrap_or(0),
        None => 0,
      }
    } else {
      0
    };
    let entry = state.entries.remove(index)?;
    state.last_session = Some(entry.session_id.clone());
    Some(entry)
  }
}
