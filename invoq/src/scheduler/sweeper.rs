//! 清扫器模块
//! Sweeper module
//!
//! 与工作者一起运行的周期组件：按保留期删除老文件，
//! 然后把文件已失的 completed 记录降为 expired
//! A periodic component running alongside the workers: deletes files past the
//! retention horizon, then demotes completed records whose files are gone to
//! expired

use crate::scheduler::Scheduler;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 清扫器，按固定周期触发调度器的清理轮
/// Sweeper, firing the scheduler's cleanup round on a fixed cadence
pub struct Sweeper {
  scheduler: Arc<Scheduler>,
}

impl Sweeper {
  /// 创建清扫器
  /// Create the sweeper
  pub fn new(scheduler: Arc<Scheduler>) -> Self {
    Self { scheduler }
  }

  /// 启动清扫循环；随调度器的关停信号退出
  /// Start the sweep loop; exits with the scheduler's shutdown signal
  pub fn start(self) -> JoinHandle<()> {
    let scheduler = self.scheduler;
    tokio::spawn(async move {
      let shutdown = scheduler.shutdown_token();
      let mut ticker = tokio::time::interval(scheduler.cleanup_interval());
      // 第一个 tick 立即返回，跳过以避免启动即清扫
      // The first tick fires immediately; skipped to avoid sweeping at startup
      ticker.tick().await;
      loop {
        tokio::select! {
          _ = ticker.tick() => {}
          _ = shutdown.cancelled() => {
            tracing::debug!("sweeper shutting down");
            break;
          }
        }
        match scheduler.run_sweep_once().await {
          Ok(report) => {
            if report.files_removed > 0 {
              tracing::info!(
                files = report.files_removed,
                bytes = report.bytes_removed,
                tasks = report.affected_tasks.len(),
                "periodic sweep removed aged objects"
              );
            }
          }
          Err(error) => tracing::error!(%error, "periodic sweep failed"),
        }
      }
    })
  }
}
