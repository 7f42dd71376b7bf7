//! 工作者执行模块
//! Worker execution module
//!
//! 单个任务的处理流水线：展开归档、读取输入、合成、落盘输出。
//! 错误以显式结果值向上传递，由调度器切换写入终态
//! The processing pipeline for one task: expand archives, read inputs,
//! compose, persist the output. Errors propagate as explicit result values
//! and the scheduler switches on them to write the terminal state

use crate::base::Registry;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::impose::{compose, ComposeInput, LayoutConfig};
use crate::progress::{pin_render_progress, ProgressSnapshot, ProgressTracker};
use crate::storage::StorageManager;
use crate::task::TaskRecord;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 工作者间共享的活跃任务进度视图
/// Live progress view of active tasks, shared between workers
pub type LiveProgress = Arc<Mutex<HashMap<String, ProgressSnapshot>>>;

/// 工作者上下文：配置与句柄显式传入，不依赖全局状态
/// Worker context: configuration and handles are passed explicitly,
/// no global state
#[derive(Clone)]
pub struct WorkerContext {
  pub registry: Arc<dyn Registry>,
  pub storage: Arc<StorageManager>,
  pub config: Arc<Config>,
  pub layout: Arc<LayoutConfig>,
  pub live: LiveProgress,
}

impl WorkerContext {
  /// 推送一次进度：注册表加活跃视图
  /// Push one progress update to the registry and the live view
  async fn push_progress(&self, task_id: &str, tracker: &ProgressTracker) {
    if let Err(error) = self
      .registry
      .update_progress(task_id, tracker.progress(), tracker.stage())
      .await
    {
      tracing::warn!(task_id, %error, "failed to persist progress update");
    }
    self
      .live
      .lock()
      .unwrap()
      .insert(task_id.to_string(), tracker.snapshot());
  }

  /// 任务结束后清除活跃视图
  /// Clear the live view once the task is over
  pub fn clear_live(&self, task_id: &str) {
    self.live.lock().unwrap().remove(task_id);
  }
}

/// 执行一个任务，返回输出文件的存储路径
/// Execute one task, returning the storage paths of the outputs
///
/// 取消检查点位于阶段之间和页面之间；调用方负责把返回的错误
/// 写入任务记录
/// Cancellation checkpoints sit between phases and between pages; the caller
/// is responsible for writing the returned error into the task record
pub async fn execute_job(
  ctx: &WorkerContext,
  record: &TaskRecord,
  cancel: CancellationToken,
) -> Result<Vec<String>> {
  let task_id = record.task_id.as_str();
  let mut tracker = ProgressTracker::new();

  tracker.update(5, "extracting");
  ctx.push_progress(task_id, &tracker).await;

  // ZIP 归档先展开；拼版引擎只见到纯 PDF
  // ZIP archives are expanded first; the engine only ever sees plain PDFs
  let mut pdf_paths: Vec<PathBuf> = Vec::new();
  for input_ref in &record.input_refs {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let path = PathBuf::from(input_ref);
    let is_zip = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.eq_ignore_ascii_case("zip"))
      .unwrap_or(false);
    if is_zip {
      let extracted = ctx.storage.extract_archive(&path, task_id)?;
      pdf_paths.extend(extracted);
    } else {
      pdf_paths.push(path);
    }
  }

  let mut inputs = Vec::with_capacity(pdf_paths.len());
  for path in &pdf_paths {
    let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("input.pdf")
      .to_string();
    let data = std::fs::read(path).map_err(|_| Error::bad_input(name.clone()))?;
    inputs.push(ComposeInput::new(name, data));
  }
  if inputs.is_empty() {
    return Err(Error::EmptyBatch);
  }
  let input_count = inputs.len();

  if cancel.is_cancelled() {
    return Err(Error::Cancelled);
  }

  // 合成在阻塞线程上运行；页面进度经通道回流，合并后推送
  // Composition runs on a blocking thread; page progress flows back through
  // a channel and is pushed after coalescing
  let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(usize, usize)>();
  let compose_cancel = cancel.clone();
  let layout = ctx.layout.as_ref().clone();
  let memory_ceiling = ctx.config.compose_memory_ceiling;
  let compose_handle = tokio::task::spawn_blocking(move || {
    let report = |done: usize, total: usize| {
      let _ = progress_tx.send((done, total));
    };
    compose(&inputs, &layout, memory_ceiling, &report, &compose_cancel)
  });

  while let Some((done, total)) = progress_rx.recv().await {
    let pinned = pin_render_progress(done, total);
    let stage = format!("rendering page {done}/{total}");
    if tracker.update(pinned, &stage) {
      ctx.push_progress(task_id, &tracker).await;
    }
  }

  let composed = compose_handle
    .await
    .map_err(|_| Error::internal("composition task panicked"))??;

  tracker.update(98, "writing output");
  ctx.push_progress(task_id, &tracker).await;

  let output_name = output_file_name(task_id, input_count);
  let output_path =
    ctx
      .storage
      .store_output(&record.session_id, task_id, &output_name, &composed)?;

  // 抽取用的临时目录随任务退出一起清掉
  // The extraction temp directory goes away with the job
  if let Err(error) = ctx.storage.remove_temp(task_id) {
    tracing::warn!(task_id, %error, "failed to remove temp directory");
  }

  Ok(vec![output_path.to_string_lossy().into_owned()])
}

/// 输出文件名：日期、票据数量、任务前缀
/// Output file name: date, invoice count, task prefix
fn output_file_name(task_id: &str, input_count: usize) -> String {
  let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
  let prefix = task_id.get(..8).unwrap_or(task_id);
  format!("invoice_layout_{stamp}_{input_count}invoices_{prefix}.pdf")
}
