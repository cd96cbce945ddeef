//! 依赖图
//!
//! - [`DependencyGraph`] - 键之间的依赖关系图，提供环检测与分层拓扑排序
//! - [`DependencyAnalyzer`] - 构建期校验注册表并产出分层结果

pub mod analyzer;
pub mod dependency;

pub use analyzer::{describe_cycle, DependencyAnalyzer, GraphAnalysis};
pub use dependency::DependencyGraph;
