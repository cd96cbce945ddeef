//! # Chips DI - 薯片依赖解析引擎
//!
//! 并发安全的依赖解析与生命周期引擎，提供以下核心功能：
//!
//! - **注册表**: 以键登记工厂、作用域与声明的依赖
//! - **依赖图分析**: 构建期检测缺失依赖与循环依赖，并给出拓扑分层
//! - **作用域存储**: permanent / cached (TTL + LRU/FIFO) / weak / transient
//! - **单飞解析**: 同一个键的并发解析只执行一次工厂，运行期检测循环
//! - **分层并行启动**: 逐层并发预热 `eager` 层，失败相互隔离
//! - **生命周期**: 可观察的 `idle → configuring → warming_up → ready` 状态序列
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_di::{Container, Key, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder()
//!         .register("greeting", Scope::Permanent, &[], |_r| async {
//!             Ok(String::from("hello"))
//!         })
//!         .register("service", Scope::eager(), &["greeting"], |r| async move {
//!             let greeting: Arc<String> = r.resolve(&Key::new("greeting")).await?;
//!             Ok(format!("{}, world", greeting))
//!         })
//!         .build()
//!         .await?;
//!
//!     let service: Arc<String> = container.resolve("service").await?;
//!     assert_eq!(service.as_str(), "hello, world");
//!
//!     container.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `registry` - 键、作用域、实例与注册表
//! - `graph` - 依赖图与分析器
//! - `store` - 作用域存储
//! - `resolver` - 单飞解析器
//! - `startup` - 分层并行启动
//! - `lifecycle` - 生命周期状态机
//! - `api` - 容器与服务清单
//! - `core` - 配置
//! - `utils` - 错误类型、日志、指标与 ID

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod graph;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod startup;
pub mod store;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{Container, ContainerBuilder, ManifestSource, ServiceManifest};
pub use graph::{DependencyAnalyzer, DependencyGraph, GraphAnalysis};
pub use lifecycle::{LifecycleOrchestrator, LifecyclePhase, LifecycleState};
pub use registry::{Instance, Key, Registration, RegistrationSource, Registry, Scope};
pub use resolver::Resolver;
pub use startup::StartupMetrics;
pub use store::CacheStats;

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, generate_id, generate_uuid, DiError, Result};

pub use crate::core::config::{
    CacheConfig, DiConfig, DiConfigBuilder, EvictionPolicy, LogConfig, MemoryPressureConfig,
    StartupConfig,
};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
