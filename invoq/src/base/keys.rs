//! 注册表键构造
//! Registry key construction
//!
//! 与持久化状态布局保持一致：`task:<task_id>`、`session:<session_id>:tasks`
//! Matches the persisted state layout: `task:<task_id>`, `session:<session_id>:tasks`

/// 任务记录键
/// Task record key
pub fn task_key(task_id: &str) -> String {
  format!("task:{task_id}")
}

/// 会话任务集合键
/// Session task-set key
pub fn session_tasks_key(session_id: &str) -> String {
  format!("session:{session_id}:tasks")
}
