use std::time::Duration;

/// 默认工作者数量
/// Default number of workers
pub const DEFAULT_WORKERS: usize = 4;

/// 默认队列容量
/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// 默认的单文件上传上限（50 MiB）
/// Default per-file upload cap (50 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// 进度更新的最小间隔（≤2 Hz 合并）
/// Minimum interval between progress updates (coalesced to <=2 Hz)
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// 渲染阶段进度的下限和上限
/// Lower and upper bounds for render-phase progress
pub const RENDER_PROGRESS_FLOOR: u8 = 10;
pub const RENDER_PROGRESS_CEIL: u8 = 95;

/// 会话的建议有效期（小时）
/// Advisory session lifetime, in hours
pub const SESSION_ADVISORY_HOURS: u64 = 72;

/// 文件名清洗后的最大字节长度
/// Maximum byte length of a sanitized file name
pub const MAX_FILE_NAME_BYTES: usize = 128;

/// 版本信息
/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
