//! Redis 后端模块
//! Redis backend module
//!
//! 参考部署使用的注册表实现，记录以 JSON 存储并依赖键级 TTL
//! The reference-deployment registry; records are stored as JSON and rely on
//! per-key TTLs

mod redis_registry;
mod scripts;

pub use redis_registry::RedisRegistry;
