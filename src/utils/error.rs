//! 依赖解析引擎错误类型定义
//!
//! 本模块定义了引擎中使用的所有错误类型。
//!
//! 错误类型实现了 `Clone`，因为同一次单飞创建的结果会被所有并发等待者共享。

use thiserror::Error;

/// 依赖解析引擎核心错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiError {
    // ==================== 解析错误 ====================

    /// 未找到注册项（当前容器及所有祖先容器中都不存在）
    #[error("未找到注册项: '{0}'")]
    KeyNotFound(String),

    /// 实例类型与期望类型不匹配
    #[error("类型不匹配: '{key}' 期望类型 {expected}, 实际类型 {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// 循环依赖（构建期校验与运行期解析链共用）
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    /// 工厂函数执行失败
    #[error("工厂函数执行失败: '{key}' - {reason}")]
    FactoryFailed { key: String, reason: String },

    /// 弱引用目标已被释放
    #[error("弱引用目标已释放: '{0}'")]
    WeakTargetDeallocated(String),

    /// 容器正在关闭或已关闭
    #[error("容器正在关闭，拒绝解析")]
    ShutdownInProgress,

    /// 容器尚未就绪
    #[error("容器尚未就绪，当前状态: {0}")]
    ContainerNotReady(String),

    // ==================== 构建期校验错误 ====================

    /// 依赖缺失
    #[error("依赖缺失: {0:?}")]
    MissingDependencies(Vec<String>),

    // ==================== 启动错误 ====================

    /// 预热阶段部分初始化失败
    #[error(
        "部分初始化失败: {} 个成功, {} 个失败",
        .successful.len(),
        .failed.len()
    )]
    PartialInitializationFailure {
        successful: Vec<String>,
        failed: Vec<(String, DiError)>,
    },

    /// 启动协调器不可用（已被拆除）
    #[error("启动协调器不可用: {0}")]
    CoordinatorUnavailable(String),

    // ==================== 生命周期错误 ====================

    /// 非法的生命周期状态转换
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue { key: String, reason: String },

    /// 服务清单无效
    #[error("服务清单无效: {0}")]
    InvalidManifest(String),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 引擎操作结果类型别名
pub type Result<T> = std::result::Result<T, DiError>;

/// 错误码常量
pub mod error_code {
    // 解析错误 (RESOLVE-xxx)
    pub const RESOLVE_KEY_NOT_FOUND: &str = "RESOLVE-001";
    pub const RESOLVE_TYPE_MISMATCH: &str = "RESOLVE-002";
    pub const RESOLVE_CIRCULAR_DEPENDENCY: &str = "RESOLVE-003";
    pub const RESOLVE_FACTORY_FAILED: &str = "RESOLVE-004";
    pub const RESOLVE_WEAK_DEALLOCATED: &str = "RESOLVE-005";

    // 校验错误 (GRAPH-xxx)
    pub const GRAPH_MISSING_DEPENDENCIES: &str = "GRAPH-001";

    // 启动错误 (STARTUP-xxx)
    pub const STARTUP_PARTIAL_FAILURE: &str = "STARTUP-001";
    pub const STARTUP_COORDINATOR_UNAVAILABLE: &str = "STARTUP-002";

    // 生命周期错误 (LIFECYCLE-xxx)
    pub const LIFECYCLE_SHUTDOWN: &str = "LIFECYCLE-001";
    pub const LIFECYCLE_NOT_READY: &str = "LIFECYCLE-002";
    pub const LIFECYCLE_INVALID_TRANSITION: &str = "LIFECYCLE-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
    pub const CONFIG_INVALID_MANIFEST: &str = "CONFIG-003";

    pub const INTERNAL: &str = "INTERNAL-001";
}

impl DiError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            DiError::KeyNotFound(_) => error_code::RESOLVE_KEY_NOT_FOUND,
            DiError::TypeMismatch { .. } => error_code::RESOLVE_TYPE_MISMATCH,
            DiError::CircularDependency(_) => error_code::RESOLVE_CIRCULAR_DEPENDENCY,
            DiError::FactoryFailed { .. } => error_code::RESOLVE_FACTORY_FAILED,
            DiError::WeakTargetDeallocated(_) => error_code::RESOLVE_WEAK_DEALLOCATED,
            DiError::ShutdownInProgress => error_code::LIFECYCLE_SHUTDOWN,
            DiError::ContainerNotReady(_) => error_code::LIFECYCLE_NOT_READY,
            DiError::MissingDependencies(_) => error_code::GRAPH_MISSING_DEPENDENCIES,
            DiError::PartialInitializationFailure { .. } => error_code::STARTUP_PARTIAL_FAILURE,
            DiError::CoordinatorUnavailable(_) => error_code::STARTUP_COORDINATOR_UNAVAILABLE,
            DiError::InvalidStateTransition { .. } => error_code::LIFECYCLE_INVALID_TRANSITION,
            DiError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            DiError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            DiError::InvalidManifest(_) => error_code::CONFIG_INVALID_MANIFEST,
            DiError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// 是否为构建期图校验错误
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            DiError::MissingDependencies(_) | DiError::CircularDependency(_)
        )
    }

    /// 把工厂函数返回的 `anyhow::Error` 转换为引擎错误
    ///
    /// 嵌套解析中产生的循环依赖和关闭错误原样透传，其余错误包装为 `FactoryFailed`。
    pub fn from_factory(key: &str, err: anyhow::Error) -> Self {
        match err.downcast_ref::<DiError>() {
            Some(inner @ DiError::CircularDependency(_)) => inner.clone(),
            Some(DiError::ShutdownInProgress) => DiError::ShutdownInProgress,
            _ => DiError::FactoryFailed {
                key: key.to_string(),
                reason: format!("{:#}", err),
            },
        }
    }
}
