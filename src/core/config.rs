//! 引擎配置
//!
//! 定义容器的配置结构、文件加载、合并与校验逻辑。
//!
//! 配置文件支持 YAML 与 JSON 两种格式（按扩展名区分），所有字段都有默认值，
//! 因此一个空文件也是合法配置。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{DiError, Result};

// ==================== 缓存配置 ====================

/// 缓存淘汰策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// 最近最少使用（访问会刷新顺序）
    #[default]
    Lru,
    /// 先进先出（访问不影响顺序）
    Fifo,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
        }
    }
}

/// `Cached` 作用域的缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 最大条目数
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// 条目存活时间（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// 淘汰策略
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
}

fn default_cache_max_size() -> usize {
    100
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// 条目存活时间
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ==================== 启动配置 ====================

/// 预热阶段配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// 同时初始化的最大任务数（默认 min(CPU 核心数, 8)）
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// 启动时主动初始化的层名称
    #[serde(default = "default_eager_layer")]
    pub eager_layer: String,
}

fn default_max_concurrency() -> usize {
    crate::startup::default_worker_limit()
}

fn default_eager_layer() -> String {
    "eager".to_string()
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            eager_layer: default_eager_layer(),
        }
    }
}

// ==================== 内存压力配置 ====================

/// 内存压力监控配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPressureConfig {
    /// 是否启用后台监控
    #[serde(default)]
    pub enabled: bool,

    /// 采样间隔（秒）
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// 常驻内存阈值（MB），超过即触发淘汰
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,

    /// 每次淘汰的缓存比例（0, 1]
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_memory_threshold_mb() -> u64 {
    512
}

fn default_eviction_fraction() -> f64 {
    0.25
}

impl Default for MemoryPressureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: default_check_interval_secs(),
            memory_threshold_mb: default_memory_threshold_mb(),
            eviction_fraction: default_eviction_fraction(),
        }
    }
}

// ==================== 日志配置 ====================

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

// ==================== 顶层配置 ====================

/// 容器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiConfig {
    /// 配置文件路径（加载时填充）
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 预热配置
    #[serde(default)]
    pub startup: StartupConfig,

    /// 内存压力配置
    #[serde(default)]
    pub memory_pressure: MemoryPressureConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 开发模式（输出更多诊断信息）
    #[serde(default)]
    pub dev_mode: bool,
}

impl DiConfig {
    /// 创建配置构建器
    pub fn builder() -> DiConfigBuilder {
        DiConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，其余按 YAML 解析。加载后会执行校验。
    ///
    /// # Errors
    ///
    /// 读取或解析失败返回 `ConfigLoadFailed`，值非法返回 `InvalidConfigValue`
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DiError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        let mut config = Self::parse(&content, is_json)
            .map_err(|reason| DiError::ConfigLoadFailed(format!("{}: {}", path.display(), reason)))?;

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config = Self::parse(content, false).map_err(DiError::ConfigLoadFailed)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, is_json: bool) -> std::result::Result<Self, String> {
        if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else if content.trim().is_empty() {
            Ok(Self::default())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        }
    }

    /// 校验配置值
    ///
    /// # Errors
    ///
    /// 第一个非法值以 `InvalidConfigValue` 返回
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| DiError::InvalidConfigValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.cache.max_size == 0 {
            return Err(invalid("cache.max_size", "必须大于 0"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "必须大于 0"));
        }
        if self.startup.max_concurrency == 0 {
            return Err(invalid("startup.max_concurrency", "必须大于 0"));
        }
        if self.startup.eager_layer.trim().is_empty() {
            return Err(invalid("startup.eager_layer", "不能为空"));
        }
        let fraction = self.memory_pressure.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(invalid(
                "memory_pressure.eviction_fraction",
                "必须位于 (0, 1] 区间",
            ));
        }
        if self.memory_pressure.check_interval_secs == 0 {
            return Err(invalid("memory_pressure.check_interval_secs", "必须大于 0"));
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    ///
    /// 只有与默认值不同的字段会覆盖当前值。
    pub fn merge(&mut self, other: DiConfig) {
        if other.cache.max_size != default_cache_max_size() {
            self.cache.max_size = other.cache.max_size;
        }
        if other.cache.ttl_secs != default_cache_ttl_secs() {
            self.cache.ttl_secs = other.cache.ttl_secs;
        }
        if other.cache.eviction_policy != EvictionPolicy::default() {
            self.cache.eviction_policy = other.cache.eviction_policy;
        }
        if other.startup.max_concurrency != default_max_concurrency() {
            self.startup.max_concurrency = other.startup.max_concurrency;
        }
        if other.startup.eager_layer != default_eager_layer() {
            self.startup.eager_layer = other.startup.eager_layer;
        }
        if other.memory_pressure.enabled {
            self.memory_pressure = other.memory_pressure;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
        if other.config_path.is_some() {
            self.config_path = other.config_path;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct DiConfigBuilder {
    config: DiConfig,
}

impl DiConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置缓存容量
    pub fn cache_max_size(mut self, max_size: usize) -> Self {
        self.config.cache.max_size = max_size;
        self
    }

    /// 设置缓存存活时间
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl_secs = ttl.as_secs().max(1);
        self
    }

    /// 设置淘汰策略
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.cache.eviction_policy = policy;
        self
    }

    /// 设置预热并发上限
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.startup.max_concurrency = limit;
        self
    }

    /// 设置主动初始化层名称
    pub fn eager_layer(mut self, name: impl Into<String>) -> Self {
        self.config.startup.eager_layer = name.into();
        self
    }

    /// 启用内存压力监控
    pub fn memory_pressure(mut self, threshold_mb: u64, eviction_fraction: f64) -> Self {
        self.config.memory_pressure.enabled = true;
        self.config.memory_pressure.memory_threshold_mb = threshold_mb;
        self.config.memory_pressure.eviction_fraction = eviction_fraction;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> DiConfig {
        self.config
    }
}
