//! 容器生命周期
//!
//! - [`LifecycleState`] - 可观察的状态序列
//! - [`LifecycleOrchestrator`] - 驱动启动流程并广播状态变化

pub mod orchestrator;
pub mod state;

pub use orchestrator::{BootOutcome, LifecycleOrchestrator, EVENT_CHANNEL_CAPACITY};
pub use state::{LifecyclePhase, LifecycleState};
