//! 分层并行启动
//!
//! - [`ConcurrencyLimiter`] - 基于信号量的并发限制
//! - [`StartupCoordinator`] - 预热层的逐层并发初始化

pub mod concurrency;
pub mod coordinator;

pub use concurrency::{default_worker_limit, ConcurrencyLimiter, MAX_DEFAULT_CONCURRENCY};
pub use coordinator::{parallelization_efficiency, KeyTiming, StartupCoordinator, StartupMetrics};
