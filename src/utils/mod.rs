//! 工具模块
//!
//! 包含错误类型、ID 生成、日志系统、性能监控等通用工具。

pub mod error;
pub mod id;
pub mod logger;
pub mod metrics;

// 重导出常用类型
pub use error::{error_code, DiError, Result};
pub use id::{generate_id, generate_uuid};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use metrics::{
    EvictionTarget, LatencyMetrics, MemoryPressureMonitor, MemoryStatus, MetricsReport,
    ResolutionMetrics, ResolutionOutcome, ResolutionStats,
};
