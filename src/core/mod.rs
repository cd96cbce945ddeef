//! 核心模块
//!
//! 包含引擎配置。

pub mod config;

pub use config::{
    CacheConfig, DiConfig, DiConfigBuilder, EvictionPolicy, LogConfig, MemoryPressureConfig,
    StartupConfig,
};
