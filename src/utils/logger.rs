//! 日志系统模块
//!
//! 基于 tracing 生态为引擎提供日志输出：
//!
//! - 多级别日志（TRACE, DEBUG, INFO, WARN, ERROR）
//! - 结构化日志（JSON 格式输出）
//! - 文件日志输出（异步非阻塞，按时间轮转）
//! - `EnvFilter` 过滤（`RUST_LOG` 优先）
//!
//! 引擎内部只使用 `tracing` 宏记录事件，是否初始化订阅者由调用方决定。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_di::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .json_format(true)
//!     .file_output("./logs")
//!     .rotation(RotationStrategy::Hourly)
//!     .build();
//!
//! let _guard = Logger::init(config).unwrap();
//! tracing::info!(key = "database", "resolved");
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{DiError, Result};

/// 日志文件默认前缀
const DEFAULT_FILE_PREFIX: &str = "chips-di";

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每分钟轮转（主要用于测试）
    Minutely,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从字符串解析轮转策略，无法识别时退回 `Daily`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "minutely" | "minute" => RotationStrategy::Minutely,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Minutely => "minutely",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(name)
    }
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别（"trace", "debug", "info", "warn", "error"）
    pub level: String,

    /// 是否使用 JSON 格式输出
    pub json_format: bool,

    /// 是否输出到控制台
    pub console_output: bool,

    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    /// 日志轮转策略
    pub rotation: RotationStrategy,

    /// 保留的日志文件数
    pub max_files: usize,

    /// 是否显示目标模块
    pub show_target: bool,

    /// 是否显示线程 ID
    pub show_thread_ids: bool,

    /// 是否显示文件名和行号
    pub show_file_line: bool,

    /// 是否显示日志级别
    pub show_level: bool,

    /// 自定义过滤指令（EnvFilter 格式），例如 "chips_di::resolver=trace"
    pub filter_directives: Option<String>,

    /// 是否启用 ANSI 颜色（仅控制台）
    pub ansi_colors: bool,

    /// 是否记录 span 关闭事件（可用于观察每次解析的耗时）
    pub span_close_events: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            show_target: true,
            show_thread_ids: false,
            show_file_line: true,
            show_level: true,
            filter_directives: None,
            ansi_colors: true,
            span_close_events: false,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::new()
    }

    /// 从 `DiConfig` 的日志段创建
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            max_files: log_config.max_files,
            ..Default::default()
        }
    }

    fn parse_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 显示线程 ID
    pub fn show_thread_ids(mut self, enable: bool) -> Self {
        self.config.show_thread_ids = enable;
        self
    }

    /// 显示文件名和行号
    pub fn show_file_line(mut self, enable: bool) -> Self {
        self.config.show_file_line = enable;
        self
    }

    /// 设置过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 记录 span 关闭事件
    pub fn span_close_events(mut self, enable: bool) -> Self {
        self.config.span_close_events = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时等待挂起的日志写完。
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 守卫持有的写入器数量
    pub fn writer_count(&self) -> usize {
        self.guards.len()
    }
}

/// 全局日志初始化状态
static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化日志系统
    ///
    /// 返回的 `LogGuard` 必须保持存活直到程序退出。
    ///
    /// # Errors
    ///
    /// 日志系统已初始化或订阅者注册失败时返回 `DiError::Internal`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(DiError::Internal(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = Self::create_env_filter(&config);
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, console_guard) = tracing_appender::non_blocking(io::stdout());
            guard.guards.push(console_guard);
            layers.push(Self::fmt_layer(&config, writer, config.ansi_colors));
        }

        if let Some(ref log_dir) = config.file_output {
            let appender = RollingFileAppender::builder()
                .rotation(config.rotation.to_rotation())
                .filename_prefix(config.file_prefix.as_str())
                .filename_suffix("log")
                .max_log_files(config.max_files.max(1))
                .build(log_dir)
                .map_err(|e| DiError::Internal(format!("日志文件创建失败: {}", e)))?;
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard.guards.push(file_guard);
            // 文件不使用 ANSI
            layers.push(Self::fmt_layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| DiError::Internal(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化日志系统，已初始化时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn fmt_layer<W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let span_events = if config.span_close_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_span_events(span_events);

        if config.json_format {
            layer.json().with_ansi(false).boxed()
        } else {
            layer
                .with_level(config.show_level)
                .with_ansi(ansi)
                .boxed()
        }
    }

    fn create_env_filter(config: &LoggerConfig) -> EnvFilter {
        // RUST_LOG 优先
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.parse_level().to_string()));

        match config.filter_directives {
            Some(ref directives) => directives
                .split(',')
                .filter_map(|directive| directive.trim().parse().ok())
                .fold(filter, |f, directive| f.add_directive(directive)),
            None => filter,
        }
    }
}

/// 标准日志字段名称
pub mod fields {
    /// 注册键
    pub const KEY: &str = "key";
    /// 作用域
    pub const SCOPE: &str = "scope";
    /// 容器 ID
    pub const CONTAINER_ID: &str = "container_id";
    /// 预热运行 ID
    pub const RUN_ID: &str = "run_id";
    /// 初始化层序号
    pub const LAYER: &str = "layer";
    /// 耗时（微秒）
    pub const DURATION_US: &str = "duration_us";
    /// 错误码
    pub const ERROR_CODE: &str = "error_code";
    /// 生命周期状态
    pub const STATE: &str = "state";
}

/// 创建一次解析的 span
///
/// ```rust,ignore
/// let span = chips_di::resolve_span!(key, container_id);
/// ```
#[macro_export]
macro_rules! resolve_span {
    ($key:expr, $container_id:expr) => {
        tracing::debug_span!(
            "resolve",
            key = %$key,
            container_id = %$container_id
        )
    };
}

/// 记录解析失败
#[macro_export]
macro_rules! log_resolve_failure {
    ($key:expr, $error:expr) => {
        tracing::warn!(
            key = %$key,
            error_code = %$error.error_code(),
            error = %$error,
            "解析失败"
        )
    };
}
