//! 存储管理模块
//! Storage management module
//!
//! 负责磁盘目录树的所有权：分配每会话/每任务的路径、防止路径穿越、
//! 执行基于文件年龄的清理扫描
//! Owns the on-disk directory tree: allocates per-session/per-task paths,
//! prevents path traversal, and performs age-based sweeps
//!
//! 目录布局 / Directory layout:
//! ```text
//! <root>/uploads/<session_id>/<task_id>/<n>-<sanitized_name>
//! <root>/outputs/<session_id>/<task_id>/<output_name>
//! <root>/temp/<task_id>/...
//! ```

use crate::base::constants::MAX_FILE_NAME_BYTES;
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// 清理扫描的结果
/// Result of a cleanup sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
  /// 删除的文件数
  /// Number of files removed
  pub files_removed: usize,
  /// 删除的字节数
  /// Number of bytes removed
  pub bytes_removed: u64,
  /// 失去了至少一个对象的任务集合
  /// Set of tasks that lost at least one object
  pub affected_tasks: Vec<String>,
}

/// 各区域的存储用量（字节）
/// Per-area storage usage, in bytes
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct StorageUsage {
  pub uploads_bytes: u64,
  pub outputs_bytes: u64,
  pub temp_bytes: u64,
  pub total_bytes: u64,
}

/// 文件存储管理器
/// File storage manager
#[derive(Debug, Clone)]
pub struct StorageManager {
  root: PathBuf,
  uploads: PathBuf,
  outputs: PathBuf,
  temp: PathBuf,
  max_upload_bytes: u64,
  zip_max_decompressed: u64,
  zip_max_ratio: u64,
}

impl StorageManager {
  /// 创建存储管理器并建立目录树
  /// Create the storage manager and establish the directory tree
  pub fn new(config: &Config) -> Result<Self> {
    let root = config.storage_root.clone();
    let manager = Self {
      uploads: root.join("uploads"),
      outputs: root.join("outputs"),
      temp: root.join("temp"),
      root,
      max_upload_bytes: config.max_file_size,
      zip_max_decompressed: config.zip_max_decompressed,
      zip_max_ratio: config.zip_max_ratio,
    };
    fs::create_dir_all(&manager.uploads)?;
    fs::create_dir_all(&manager.outputs)?;
    fs::create_dir_all(&manager.temp)?;
    tracing::info!(root = %manager.root.display(), "storage directories initialized");
    Ok(manager)
  }

  /// 存储根目录
  /// Storage root directory
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 验证根目录可写
  /// Verify the root directory is writable
  pub fn check_writable(&self) -> Result<()> {
    let probe = self.root.join(".write-probe");
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)?;
    Ok(())
  }

  fn upload_dir(&self, session_id: &str, task_id: &str) -> Result<PathBuf> {
    Ok(
      self
        .uploads
        .join(safe_component(session_id)?)
        .join(safe_component(task_id)?),
    )
  }

  fn output_dir(&self, session_id: &str, task_id: &str) -> Result<PathBuf> {
    Ok(
      self
        .outputs
        .join(safe_component(session_id)?)
        .join(safe_component(task_id)?),
    )
  }

  fn temp_dir(&self, task_id: &str) -> Result<PathBuf> {
    Ok(self.temp.join(safe_component(task_id)?))
  }

  /// 原子地存储一个上传文件，返回其存储路径
  /// Atomically store one uploaded file, returning its storage path
  ///
  /// 文件名会被清洗并加上批次序号前缀；超过上传上限的写入被拒绝
  /// The file name is sanitized and prefixed with the batch ordinal; writes
  /// past the upload cap are refused
  pub fn store_upload(
    &self,
    session_id: &str,
    task_id: &str,
    ordinal: usize,
    name: &str,
    bytes: &[u8],
  ) -> Result<PathBuf> {
    if bytes.len() as u64 > self.max_upload_bytes {
      return Err(Error::PayloadTooLarge {
        size: bytes.len() as u64,
        limit: self.max_upload_bytes,
      });
    }
    let dir = self.upload_dir(session_id, task_id)?;
    fs::create_dir_all(&dir)?;
    let file_name = format!("{ordinal}-{}", sanitize_file_name(name)?);
    let path = dir.join(&file_name);
    write_atomic(&path, bytes)?;
    tracing::debug!(task_id, file = %file_name, size = bytes.len(), "stored upload");
    Ok(path)
  }

  /// 原子地存储一个输出文件
  /// Atomically store one output file
  pub fn store_output(
    &self,
    session_id: &str,
    task_id: &str,
    name: &str,
    bytes: &[u8],
  ) -> Result<PathBuf> {
    let dir = self.output_dir(session_id, task_id)?;
    fs::create_dir_all(&dir)?;
    let path = dir.join(sanitize_file_name(name)?);
    write_atomic(&path, bytes)?;
    tracing::debug!(task_id, file = name, size = bytes.len(), "stored output");
    Ok(path)
  }

  /// 将 ZIP 归档展开到任务的临时目录，仅接纳 `.pdf` 条目
  /// Expand a ZIP archive into the task's temp directory, admitting only
  /// `.pdf` entries
  ///
  /// 拒绝清洗后会逃出临时根的条目（zip-slip），以及解压体积超过
  /// 绝对上限或压缩比上限的条目（zip 炸弹）
  /// Entries whose sanitized path would escape the temp root (zip-slip) and
  /// entries whose decompressed size exceeds the absolute or ratio ceiling
  /// (zip bomb) are refused
  pub fn extract_archive(&self, archive_path: &Path, task_id: &str) -> Result<Vec<PathBuf>> {
    let temp_dir = self.temp_dir(task_id)?;
    fs::create_dir_all(&temp_dir)?;

    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut extracted = Vec::new();
    let mut total_decompressed: u64 = 0;
    for index in 0..archive.len() {
      let mut entry = archive.by_index(index)?;
      if entry.is_dir() {
        continue;
      }
      let raw_name = entry.name().to_string();
      if !raw_name.to_lowercase().ends_with(".pdf") {
        tracing::debug!(entry = %raw_name, "skipping non-PDF archive entry");
        continue;
      }
      // zip-slip 防护：enclosed_name 拒绝 `..` 与绝对路径
      // zip-slip guard: enclosed_name rejects `..` and absolute paths
      let Some(enclosed) = entry.enclosed_name() else {
        // 路径想逃出解压根目录的条目直接判为坏输入
        // An entry trying to escape the extraction root is bad input outright
        return Err(Error::bad_input(raw_name));
      };
      let flat_name = enclosed
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::bad_input(raw_name.clone()))?;

      let size = entry.size();
      total_decompressed = total_decompressed.saturating_add(size);
      if size > self.zip_max_decompressed || total_decompressed > self.zip_max_decompressed {
        return Err(Error::oversize(format!(
          "archive decompresses past the {} byte ceiling",
          self.zip_max_decompressed
        )));
      }
      let compressed = entry.compressed_size().max(1);
      if size / compressed > self.zip_max_ratio {
        return Err(Error::oversize(format!(
          "archive entry {raw_name} exceeds compression ratio {}",
          self.zip_max_ratio
        )));
      }

      // 展平为 <index>-<name> 以避免嵌套目录间的重名冲突
      // Flattened to <index>-<name> to avoid collisions between nested directories
      let target = temp_dir.join(format!("{index}-{}", sanitize_file_name(flat_name)?));
      let mut data = Vec::with_capacity(size as usize);
      entry.read_to_end(&mut data)?;
      write_atomic(&target, &data)?;
      extracted.push(target);
    }
    tracing::info!(task_id, count = extracted.len(), "extracted PDF entries from archive");
    Ok(extracted)
  }

  /// 解析并校验一个输出文件的读取路径
  /// Resolve and validate the read path of an output file
  ///
  /// canonicalize 后必须仍位于 `outputs/<session>/<task>/` 之下
  /// After canonicalization the result must stay under `outputs/<session>/<task>/`
  pub fn open_for_read(&self, session_id: &str, task_id: &str, name: &str) -> Result<PathBuf> {
    let dir = self.output_dir(session_id, task_id)?;
    let candidate = dir.join(sanitize_file_name(name)?);
    let resolved = candidate.canonicalize().map_err(|_| Error::TaskNotFound {
      id: task_id.to_string(),
    })?;
    let confined = dir
      .canonicalize()
      .map(|dir| resolved.starts_with(&dir))
      .unwrap_or(false);
    if !confined || !resolved.is_file() {
      return Err(Error::TaskNotFound {
        id: task_id.to_string(),
      });
    }
    Ok(resolved)
  }

  /// 列出任务的输出文件
  /// List a task's output files
  pub fn list_outputs(&self, session_id: &str, task_id: &str) -> Result<Vec<PathBuf>> {
    let dir = self.output_dir(session_id, task_id)?;
    if !dir.exists() {
      return Ok(Vec::new());
    }
    let mut outputs: Vec<PathBuf> = fs::read_dir(&dir)?
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .filter(|path| path.is_file())
      .collect();
    outputs.sort();
    Ok(outputs)
  }

  /// 删除任务的全部对象；幂等
  /// Remove all objects of a task; idempotent
  pub fn purge(&self, session_id: &str, task_id: &str) -> Result<()> {
    for dir in [
      self.upload_dir(session_id, task_id)?,
      self.output_dir(session_id, task_id)?,
      self.temp_dir(task_id)?,
    ] {
      if dir.exists() {
        fs::remove_dir_all(&dir)?;
      }
    }
    tracing::debug!(task_id, "purged task objects");
    Ok(())
  }

  /// 删除任务的临时目录
  /// Remove a task's temp directory
  pub fn remove_temp(&self, task_id: &str) -> Result<()> {
    let dir = self.temp_dir(task_id)?;
    if dir.exists() {
      fs::remove_dir_all(&dir)?;
    }
    Ok(())
  }

  /// 删除修改时间早于 cutoff 的对象，返回受影响的任务集合
  /// Delete objects whose mtime predates the cutoff, returning the affected
  /// task set
  ///
  /// `active` 中的任务正被工作者持有，其对象被跳过
  /// Tasks in `active` are held by workers and their objects are skipped
  pub fn sweep(&self, cutoff: SystemTime, active: &HashSet<String>) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut affected = HashSet::new();

    // uploads/ 和 outputs/ 的路径形如 <area>/<session>/<task>/<file>
    // uploads/ and outputs/ paths look like <area>/<session>/<task>/<file>
    for area in [&self.uploads, &self.outputs] {
      for entry in WalkDir::new(area).min_depth(3).max_depth(3) {
        let entry = match entry {
          Ok(entry) => entry,
          Err(error) => {
            tracing::warn!(%error, "sweep could not visit entry");
            continue;
          }
        };
        if !entry.file_type().is_file() {
          continue;
        }
        let Some(task_id) = component_name(entry.path().parent()) else {
          continue;
        };
        if active.contains(&task_id) {
          continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff {
          match fs::remove_file(entry.path()) {
            Ok(()) => {
              report.files_removed += 1;
              report.bytes_removed += metadata.len();
              affected.insert(task_id);
            }
            Err(error) => tracing::warn!(path = %entry.path().display(), %error, "sweep failed to remove file"),
          }
        }
      }
    }

    // temp/<task>/... 整目录按目录 mtime 删除
    // temp/<task>/... is removed as whole directories by directory mtime
    if self.temp.exists() {
      for entry in fs::read_dir(&self.temp)? {
        let entry = match entry {
          Ok(entry) => entry,
          Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_dir() {
          continue;
        }
        let Some(task_id) = component_name(Some(&path)) else {
          continue;
        };
        if active.contains(&task_id) {
          continue;
        }
        let modified = entry
          .metadata()
          .and_then(|m| m.modified())
          .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff {
          let size = dir_size(&path);
          if fs::remove_dir_all(&path).is_ok() {
            report.files_removed += 1;
            report.bytes_removed += size;
            affected.insert(task_id);
          }
        }
      }
    }

    prune_empty_dirs(&self.uploads);
    prune_empty_dirs(&self.outputs);

    report.affected_tasks = affected.into_iter().collect();
    report.affected_tasks.sort();
    tracing::info!(
      files = report.files_removed,
      bytes = report.bytes_removed,
      tasks = report.affected_tasks.len(),
      "sweep completed"
    );
    Ok(report)
  }

  /// 统计各区域的磁盘用量
  /// Measure per-area disk usage
  pub fn usage(&self) -> StorageUsage {
    let uploads_bytes = dir_size(&self.uploads);
    let outputs_bytes = dir_size(&self.outputs);
    let temp_bytes = dir_size(&self.temp);
    StorageUsage {
      uploads_bytes,
      outputs_bytes,
      temp_bytes,
      total_bytes: uploads_bytes + outputs_bytes + temp_bytes,
    }
  }
}

/// 清洗文件名：去除 `[A-Za-z0-9._-]` 以外的字符，拒绝空名与点开头，
/// 截断到 128 字节
/// Sanitize a file name: strip characters outside `[A-Za-z0-9._-]`, reject
/// empty and dot-leading results, truncate to 128 bytes
pub fn sanitize_file_name(name: &str) -> Result<String> {
  // 丢弃路径部分，仅保留最后一段
  // Drop any path portion, keeping only the final segment
  let base = name
    .rsplit(['/', '\\'])
    .next()
    .unwrap_or_default();
  let mut safe: String = base
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    .collect();
  safe.truncate(MAX_FILE_NAME_BYTES);
  if safe.is_empty() || safe.starts_with('.') {
    return Err(Error::bad_request(format!("unusable file name: {name}")));
  }
  Ok(safe)
}

/// 校验一个路径组件（会话/任务 ID）不含分隔符或上级引用
/// Validate a path component (session/task ID) carries no separators or
/// parent references
fn safe_component(component: &str) -> Result<&str> {
  let ok = !component.is_empty()
    && component
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    && !component.starts_with('.');
  if !ok {
    return Err(Error::bad_request(format!(
      "unsafe path component: {component}"
    )));
  }
  Ok(component)
}

/// 写临时文件再重命名，读者视角下的原子写入
/// Write a temp file then rename, atomic from the reader's perspective
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| Error::internal("write target has no parent directory"))?;
  let part = parent.join(format!(
    ".{}.part",
    path.file_name().and_then(|n| n.to_str()).unwrap_or("upload")
  ));
  {
    let mut file = fs::File::create(&part)?;
    file.write_all(bytes)?;
    file.sync_all()?;
  }
  fs::rename(&part, path)?;
  Ok(())
}

/// 路径最后一个目录组件的名字
/// Name of the last directory component of a path
fn component_name(path: Option<&Path>) -> Option<String> {
  path
    .and_then(|p| p.file_name())
    .and_then(|n| n.to_str())
    .map(|s| s.to_string())
}

/// 目录的递归字节大小
/// Recursive byte size of a directory
fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_file())
    .filter_map(|entry| entry.metadata().ok())
    .map(|metadata| metadata.len())
    .sum()
}

/// 删除空的会话/任务目录
/// Remove empty session/task directories
fn prune_empty_dirs(area: &Path) {
  for depth in [2usize, 1] {
    for entry in WalkDir::new(area)
      .min_depth(depth)
      .max_depth(depth)
      .into_iter()
      .filter_map(|entry| entry.ok())
    {
      if entry.file_type().is_dir() {
        // 仅当目录为空时才会成功
        // Only succeeds when the directory is empty
        let _ = fs::remove_dir(entry.path());
      }
    }
  }
}
