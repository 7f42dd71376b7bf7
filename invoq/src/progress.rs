//! 进度追踪模块
//! Progress tracking module
//!
//! 工作者侧的进度状态：单调夹取、≤2 Hz 合并、速率估计
//! Worker-side progress state: monotonic clamping, <=2 Hz coalescing and
//! rate estimation

use crate::base::constants::{
  PROGRESS_UPDATE_INTERVAL, RENDER_PROGRESS_CEIL, RENDER_PROGRESS_FLOOR,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// 速率估计用的 EWMA 平滑系数
/// EWMA smoothing factor for the rate estimate
const EWMA_ALPHA: f64 = 0.4;

/// 进度端点返回的富投影
/// Rich projection returned by the progress endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
  pub progress: u8,
  pub stage: String,
  /// 每分钟前进的百分比
  /// Percentage points gained per minute
  pub progress_rate_per_minute: Option<f64>,
  pub estimated_remaining_seconds: Option<u64>,
  pub estimated_completion_at: Option<DateTime<Utc>>,
}

/// 单个任务的进度追踪器
/// Progress tracker for one task
///
/// 速率估计采用最近样本增量上的 EWMA；估计方法不承载正确性，
/// 只用于展示
/// The rate estimate is an EWMA over recent sample deltas; the method does
/// not carry correctness and is display-only
#[derive(Debug)]
pub struct ProgressTracker {
  last_progress: u8,
  stage: String,
  last_push: Option<Instant>,
  last_sample: Option<(u8, Instant)>,
  /// 百分点/秒
  /// Percentage points per second
  ewma_rate: Option<f64>,
}

impl Default for ProgressTracker {
  fn default() -> Self {
    Self::new()
  }
}

impl ProgressTracker {
  /// 创建新的追踪器
  /// Create a new tracker
  pub fn new() -> Self {
    Self {
      last_progress: 0,
      stage: String::new(),
      last_push: None,
      last_sample: None,
      ewma_rate: None,
    }
  }

  /// 当前进度
  /// Current progress
  pub fn progress(&self) -> u8 {
    self.last_progress
  }

  /// 当前阶段
  /// Current stage
  pub fn stage(&self) -> &str {
    &self.stage
  }

  /// 记录一次进度样本，返回是否应当推送到注册表
  /// Record one progress sample, returning whether it should be pushed to
  /// the registry
  ///
  /// 推送条件：端点值 (0/100)、阶段变化、距上次推送超过合并间隔
  /// Push on endpoint values (0/100), stage changes, or when the coalescing
  /// interval since the last push has elapsed
  pub fn update(&mut self, progress: u8, stage: &str) -> bool {
    self.update_at(progress, stage, Instant::now())
  }

  pub(crate) fn update_at(&mut self, progress: u8, stage: &str, now: Instant) -> bool {
    let progress = progress.clamp(self.last_progress, 100);
    let stage_changed = !stage.is_empty() && stage != self.stage;

    if let Some((previous, at)) = self.last_sample {
      let elapsed = now.duration_since(at).as_secs_f64();
      if elapsed > 0.0 && progress > previous {
        let sample = (progress - previous) as f64 / elapsed;
        self.ewma_rate = Some(match self.ewma_rate {
          Some(rate) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * rate,
          None => sample,
        });
      }
    }
    self.last_sample = Some((progress, now));
    self.last_progress = progress;
    if stage_changed {
      self.stage = stage.to_string();
    }

    let should_push = progress == 0
      || progress == 100
      || stage_changed
      || self
        .last_push
        .map(|at| now.duration_since(at) >= PROGRESS_UPDATE_INTERVAL)
        .unwrap_or(true);
    if should_push {
      self.last_push = Some(now);
    }
    should_push
  }

  /// 每分钟前进的百分比
  /// Percentage points gained per minute
  pub fn rate_per_minute(&self) -> Option<f64> {
    self.ewma_rate.map(|rate| rate * 60.0)
  }

  /// 估计剩余秒数
  /// Estimated remaining seconds
  pub fn estimated_remaining_seconds(&self) -> Option<u64> {
    let rate = self.ewma_rate?;
    if rate <= 0.0 || self.last_progress >= 100 {
      return None;
    }
    let remaining = (100 - self.last_progress) as f64 / rate;
    Some(remaining.ceil() as u64)
  }

  /// 当前状态的快照
  /// Snapshot of the current state
  pub fn snapshot(&self) -> ProgressSnapshot {
    let remaining = self.estimated_remaining_seconds();
    ProgressSnapshot {
      progress: self.last_progress,
      stage: self.stage.clone(),
      progress_rate_per_minute: self.rate_per_minute(),
      estimated_remaining_seconds: remaining,
      estimated_completion_at: remaining
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
    }
  }
}

/// 把渲染进度 (已落位/总数) 钉进 [10, 95] 区间
/// Pin render progress (placed/total) into the [10, 95] band
pub fn pin_render_progress(done: usize, total: usize) -> u8 {
  if total == 0 {
    return RENDER_PROGRESS_FLOOR;
  }
  let span = (RENDER_PROGRESS_CEIL - RENDER_PROGRESS_FLOOR) as f64;
  let fraction = done.min(total) as f64 / total as f64;
  RENDER_PROGRESS_FLOOR + (span * fraction).round() as u8
}
