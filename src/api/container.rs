//! 容器
//!
//! 引擎的主要对外接口。[`ContainerBuilder`] 收集注册项，`build()` 校验依赖图、
//! 预热 `eager` 层并返回就绪的 [`Container`]。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_di::{Container, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder()
//!         .register("config", Scope::Permanent, &[], |_r| async {
//!             Ok(String::from("postgres://localhost"))
//!         })
//!         .register("db", Scope::eager(), &["config"], |r| async move {
//!             let url: Arc<String> = r.resolve(&"config".into()).await?;
//!             Ok(format!("pool({})", url))
//!         })
//!         .build()
//!         .await?;
//!
//!     let db: Arc<String> = container.resolve("db").await?;
//!     println!("{}", db);
//!
//!     container.shutdown()?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::DiConfig;
use crate::graph::DependencyAnalyzer;
use crate::lifecycle::{LifecycleOrchestrator, LifecyclePhase, LifecycleState};
use crate::registry::{Key, Registration, RegistrationSource, Registry, Scope};
use crate::resolver::Resolver;
use crate::startup::StartupMetrics;
use crate::store::CacheStats;
use crate::utils::metrics::{EvictionTarget, MemoryPressureMonitor, MetricsReport};
use crate::utils::{DiError, Result};

// ============================================================================
// 构建器
// ============================================================================

/// 容器构建器
pub struct ContainerBuilder {
    config: DiConfig,
    registry: Registry,
    sources: Vec<Arc<dyn RegistrationSource>>,
    parent: Option<Resolver>,
    lifecycle: Option<Arc<LifecycleOrchestrator>>,
}

impl ContainerBuilder {
    /// 使用默认配置创建
    pub fn new() -> Self {
        Self {
            config: DiConfig::default(),
            registry: Registry::new(),
            sources: Vec::new(),
            parent: None,
            lifecycle: None,
        }
    }

    /// 设置配置
    ///
    /// 需要在 [`subscribe`](Self::subscribe) / [`lifecycle`](Self::lifecycle) 之前调用，
    /// 之后启动协调器已按旧配置创建。
    pub fn with_config(mut self, config: DiConfig) -> Self {
        if self.lifecycle.is_some() {
            warn!("生命周期已创建，启动配置不再生效");
        }
        self.config = config;
        self
    }

    /// 注册一个工厂（同一个键后注册的覆盖先注册的）
    ///
    /// # 参数
    ///
    /// * `key` - 注册键
    /// * `scope` - 作用域
    /// * `dependencies` - 声明的依赖键名
    /// * `factory` - 异步工厂，接收解析器句柄
    pub fn register<T, F, Fut>(
        mut self,
        key: impl Into<Key>,
        scope: Scope,
        dependencies: &[&str],
        factory: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let registration = Registration::new(
            key.into(),
            scope,
            dependencies.iter().map(|d| Key::new(*d)),
            factory,
        );
        self.registry.register(registration);
        self
    }

    /// 添加一个已构造的注册项
    pub fn add_registration(mut self, registration: Registration) -> Self {
        self.registry.register(registration);
        self
    }

    /// 添加注册项来源，`build()` 时依次收集
    pub fn add_source(mut self, source: Arc<dyn RegistrationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 设置父容器，本容器未注册的键交给父容器解析
    pub fn with_parent(mut self, parent: &Container) -> Self {
        self.parent = Some(parent.resolver().clone());
        self
    }

    /// 生命周期编排器（需要在 `build()` 之前获取以观察或中止启动）
    pub fn lifecycle(&mut self) -> Arc<LifecycleOrchestrator> {
        let config = &self.config;
        Arc::clone(
            self.lifecycle
                .get_or_insert_with(|| Arc::new(LifecycleOrchestrator::new(config))),
        )
    }

    /// 订阅状态变化
    pub fn subscribe(&mut self) -> broadcast::Receiver<LifecycleState> {
        self.lifecycle().subscribe()
    }

    /// 构建容器
    ///
    /// # Errors
    ///
    /// - 来源收集失败
    /// - `MissingDependencies` / `CircularDependency` - 依赖图不合法
    /// - `ShutdownInProgress` - 启动过程中被关闭
    ///
    /// 预热阶段个别键失败不会导致构建失败，见 [`Container::startup_error`]
    pub async fn build(mut self) -> Result<Container> {
        let lifecycle = self.lifecycle();
        let outcome = lifecycle
            .boot(self.registry, &self.sources, self.parent, &self.config)
            .await?;

        let monitor = Arc::new(MemoryPressureMonitor::new(
            self.config.memory_pressure.clone(),
        ));
        let cache: Arc<dyn EvictionTarget> = outcome.resolver.store().cache().clone();
        monitor.add_target(cache);
        let monitor_task = if self.config.memory_pressure.enabled {
            debug!(
                interval_secs = self.config.memory_pressure.check_interval_secs,
                "启动内存压力监控"
            );
            Some(monitor.spawn())
        } else {
            None
        };

        info!(
            container_id = %outcome.resolver.id(),
            registrations = outcome.registry.len(),
            "容器构建完成"
        );

        Ok(Container {
            registry: outcome.registry,
            resolver: outcome.resolver,
            lifecycle,
            config: self.config,
            startup_error: outcome.startup_error,
            monitor,
            monitor_task: Mutex::new(monitor_task),
        })
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 容器
// ============================================================================

/// 就绪的容器
pub struct Container {
    registry: Arc<Registry>,
    resolver: Resolver,
    lifecycle: Arc<LifecycleOrchestrator>,
    config: DiConfig,
    startup_error: Option<DiError>,
    monitor: Arc<MemoryPressureMonitor>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl Container {
    /// 创建构建器
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// 容器 ID
    pub fn id(&self) -> &str {
        self.resolver.id()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.lifecycle.state() {
            LifecycleState::Ready(_) => Ok(()),
            LifecycleState::Shutdown => Err(DiError::ShutdownInProgress),
            other => Err(DiError::ContainerNotReady(other.to_string())),
        }
    }

    // ==================== 解析 ====================

    /// 解析实例
    ///
    /// # Errors
    ///
    /// 见 [`Resolver::resolve`]；容器关闭后返回 `ShutdownInProgress`
    pub async fn resolve<T: Send + Sync + 'static>(&self, key: impl Into<Key>) -> Result<Arc<T>> {
        self.ensure_ready()?;
        self.resolver.resolve::<T>(&key.into()).await
    }

    /// 以类型名作为键解析
    pub async fn resolve_type<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve::<T>(Key::of::<T>()).await
    }

    /// 解析失败时记录日志并返回默认值
    pub async fn safe_resolve<T>(&self, key: impl Into<Key>) -> Arc<T>
    where
        T: Default + Send + Sync + 'static,
    {
        self.safe_resolve_or(key, T::default()).await
    }

    /// 解析失败时记录日志并返回 `fallback`
    pub async fn safe_resolve_or<T>(&self, key: impl Into<Key>, fallback: T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let key = key.into();
        match self.resolve::<T>(key.clone()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    key = %key,
                    error_code = err.error_code(),
                    error = %err,
                    "解析失败，使用回退值"
                );
                Arc::new(fallback)
            }
        }
    }

    /// 本容器或祖先容器是否注册了该键
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.resolver.can_resolve(&key.into())
    }

    /// 解析器句柄
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// 冻结的注册表
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// 容器配置
    pub fn config(&self) -> &DiConfig {
        &self.config
    }

    // ==================== 生命周期 ====================

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// 是否已关闭
    pub fn is_shut_down(&self) -> bool {
        self.lifecycle.phase() == LifecyclePhase::Shutdown
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// 关闭容器
    ///
    /// 清空所有存储、中止进行中的创建，之后的解析返回 `ShutdownInProgress`。
    /// 重复调用直接返回。
    pub fn shutdown(&self) -> Result<()> {
        self.lifecycle.shutdown()?;
        self.stop_monitor();
        Ok(())
    }

    fn stop_monitor(&self) {
        let task = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    // ==================== 诊断 ====================

    /// 依赖图的 Graphviz DOT 描述
    pub fn graph_description(&self) -> String {
        DependencyAnalyzer::new(&self.registry).describe()
    }

    /// 本容器依赖图的分层（祖先容器提供的键不参与）
    pub fn layers(&self) -> Result<Vec<Vec<Key>>> {
        let parent = self.resolver.parent();
        let analysis = DependencyAnalyzer::new(&self.registry)
            .with_external(|key| parent.map(|p| p.can_resolve(key)).unwrap_or(false))
            .analyze();
        analysis.into_result()
    }

    /// 解析指标报告
    pub fn metrics(&self) -> MetricsReport {
        let mut report = self.resolver.metrics().export();
        report.memory = self.monitor.get_last_status();
        report
    }

    /// 预热统计
    pub fn startup_report(&self) -> Option<StartupMetrics> {
        self.lifecycle.startup_report()
    }

    /// 预热阶段的部分失败
    pub fn startup_error(&self) -> Option<&DiError> {
        self.startup_error.as_ref()
    }

    /// 缓存统计
    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache_stats()
    }

    /// 内存压力监控器
    pub fn memory_monitor(&self) -> &Arc<MemoryPressureMonitor> {
        &self.monitor
    }

    /// 手动触发一次内存压力淘汰，返回淘汰数量
    pub fn signal_memory_pressure(&self) -> usize {
        self.monitor.relieve()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("state", &self.lifecycle.phase())
            .field("registrations", &self.registry.len())
            .finish()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.stop_monitor();
        debug!(container_id = %self.resolver.id(), "容器实例被释放");
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheConfig, EvictionPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_build_and_resolve() {
        let container = Container::builder()
            .register("port", Scope::Permanent, &[], |_r| async { Ok(8080u16) })
            .register("addr", Scope::eager(), &["port"], |r| async move {
                let port: Arc<u16> = r.resolve(&Key::new("port")).await?;
                Ok(format!("0.0.0.0:{}", port))
            })
            .build()
            .await
            .unwrap();

        let addr: Arc<String> = container.resolve("addr").await.unwrap();
        assert_eq!(addr.as_str(), "0.0.0.0:8080");
        assert!(container.state().is_ready());
        assert_eq!(container.startup_report().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_build_rejects_missing_dependency() {
        let err = Container::builder()
            .register("svc", Scope::Permanent, &["ghost", "phantom"], |_r| async { Ok(()) })
            .build()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DiError::MissingDependencies(vec!["ghost".to_string(), "phantom".to_string()])
        );
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let container = Container::builder()
            .register("n", Scope::Permanent, &[], |_r| async { Ok(1u32) })
            .register("n", Scope::Permanent, &[], |_r| async { Ok(2u32) })
            .build()
            .await
            .unwrap();
        assert_eq!(*container.resolve::<u32>("n").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_safe_resolve_falls_back() {
        let container = Container::builder()
            .register("broken", Scope::Transient, &[], |_r| async {
                Err::<u32, _>(anyhow::anyhow!("boom"))
            })
            .build()
            .await
            .unwrap();

        assert_eq!(*container.safe_resolve::<u32>("broken").await, 0);
        assert_eq!(*container.safe_resolve::<String>("missing").await, "");
        assert_eq!(*container.safe_resolve_or("broken", 7u32).await, 7);
        assert_eq!(container.metrics().resolution.failures, 3);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_resolves() {
        let container = Container::builder()
            .register("n", Scope::Permanent, &[], |_r| async { Ok(1u8) })
            .build()
            .await
            .unwrap();
        container.resolve::<u8>("n").await.unwrap();

        container.shutdown().unwrap();
        container.shutdown().unwrap();
        assert!(container.is_shut_down());
        assert_eq!(
            container.resolve::<u8>("n").await.unwrap_err(),
            DiError::ShutdownInProgress
        );
        assert!(container.resolver().store().permanent().is_empty());
    }

    #[tokio::test]
    async fn test_child_container_falls_back_to_parent() {
        let parent = Container::builder()
            .register("db", Scope::Permanent, &[], |_r| async { Ok(String::from("db")) })
            .build()
            .await
            .unwrap();

        let child = Container::builder()
            .with_parent(&parent)
            .register("repo", Scope::Permanent, &["db"], |r| async move {
                let db: Arc<String> = r.resolve(&Key::new("db")).await?;
                Ok(format!("repo({})", db))
            })
            .build()
            .await
            .unwrap();

        assert_eq!(child.resolve::<String>("repo").await.unwrap().as_str(), "repo(db)");
        assert!(child.contains("db"));
        assert!(!parent.contains("repo"));
        assert_eq!(child.layers().unwrap(), vec![vec![Key::new("repo")]]);
    }

    #[tokio::test]
    async fn test_memory_pressure_evicts_cache_fraction() {
        let created = Arc::new(AtomicUsize::new(0));
        let config = DiConfig {
            cache: CacheConfig {
                max_size: 100,
                ttl_secs: 300,
                eviction_policy: EvictionPolicy::Lru,
            },
            ..Default::default()
        };

        let mut builder = Container::builder().with_config(config);
        for i in 0..8 {
            let created = Arc::clone(&created);
            builder = builder.register(format!("item{}", i), Scope::Cached, &[], move |_r| {
                let created = Arc::clone(&created);
                async move { Ok(created.fetch_add(1, Ordering::SeqCst)) }
            });
        }
        let container = builder.build().await.unwrap();

        for i in 0..8 {
            container.resolve::<usize>(format!("item{}", i)).await.unwrap();
        }
        assert_eq!(container.cache_stats().size, 8);

        let evicted = container.signal_memory_pressure();
        assert_eq!(evicted, 2);
        assert_eq!(container.cache_stats().size, 6);
        assert_eq!(container.memory_monitor().get_pressure_events(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_before_build() {
        let mut builder = Container::builder()
            .register("a", Scope::eager(), &[], |_r| async { Ok(()) });
        let mut rx = builder.subscribe();
        let _container = builder.build().await.unwrap();

        let mut phases = Vec::new();
        while let Ok(state) = rx.try_recv() {
            phases.push(state.phase());
        }
        assert_eq!(phases.first(), Some(&LifecyclePhase::Configuring));
        assert_eq!(phases.last(), Some(&LifecyclePhase::Ready));
    }

    #[tokio::test]
    async fn test_graph_description() {
        let container = Container::builder()
            .register("a", Scope::Permanent, &[], |_r| async { Ok(()) })
            .register("b", Scope::Weak, &["a"], |_r| async { Ok(()) })
            .build()
            .await
            .unwrap();
        let dot = container.graph_description();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("\"b\" -> \"a\";"));
    }
}
