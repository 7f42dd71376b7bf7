//! 内存后端模块
//! Memory backend module
//!
//! 不依赖外部服务的注册表实现，适合单实例部署与测试
//! Registry implementation without external service dependencies,
//! suitable for single-instance deployments and tests

mod memory_registry;

pub use memory_registry::MemoryRegistry;
