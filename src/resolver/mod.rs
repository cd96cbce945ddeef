//! 解析器
//!
//! 解析器负责按键取得实例：
//!
//! 1. 容器已关闭时拒绝解析
//! 2. 本容器没有注册项时交给父容器（只沿父链查找）
//! 3. 同一调用链上再次进入同一容器的同一键即为循环依赖；加入其他调用链的
//!    创建前，沿等待关系检查是否会绕回本链上的键
//! 4. 先查作用域存储，未命中时以单飞方式执行工厂并写回存储
//!
//! 解析器句柄可以廉价克隆。传给工厂的句柄携带当前解析链，
//! 工厂内部的嵌套解析必须使用这个句柄。

pub mod chain;
mod single_flight;

pub use chain::ResolutionChain;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, trace, Instrument};

use crate::core::config::CacheConfig;
use crate::graph::describe_cycle;
use crate::registry::{Instance, Key, Registration, Registry, StorageKind};
use crate::store::{CacheStats, ScopeStore};
use crate::utils::metrics::{ResolutionMetrics, ResolutionOutcome};
use crate::utils::{generate_id, DiError, Result};

use single_flight::{Flight, InFlight};

struct ResolverInner {
    id: Arc<str>,
    registry: Arc<Registry>,
    store: ScopeStore,
    in_flight: InFlight,
    parent: Option<Resolver>,
    metrics: Arc<ResolutionMetrics>,
    shut_down: AtomicBool,
}

/// 解析器句柄
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
    chain: ResolutionChain,
}

impl Resolver {
    /// 创建解析器
    ///
    /// # 参数
    ///
    /// * `registry` - 已冻结的注册表
    /// * `cache_config` - `Cached` 作用域的缓存配置
    /// * `parent` - 父容器的解析器
    pub fn new(
        registry: Arc<Registry>,
        cache_config: &CacheConfig,
        parent: Option<Resolver>,
    ) -> Self {
        let id: Arc<str> = Arc::from(generate_id());
        debug!(
            container_id = %id,
            registrations = registry.len(),
            has_parent = parent.is_some(),
            "创建解析器"
        );

        Self {
            inner: Arc::new(ResolverInner {
                id,
                registry,
                store: ScopeStore::new(cache_config),
                in_flight: InFlight::default(),
                // 父解析器从空链开始
                parent: parent.map(|p| p.detached()),
                metrics: Arc::new(ResolutionMetrics::new()),
                shut_down: AtomicBool::new(false),
            }),
            chain: ResolutionChain::new(),
        }
    }

    /// 容器 ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// 注册表
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// 父解析器
    pub fn parent(&self) -> Option<&Resolver> {
        self.inner.parent.as_ref()
    }

    /// 当前解析链
    pub fn chain(&self) -> &ResolutionChain {
        &self.chain
    }

    /// 作用域存储
    pub fn store(&self) -> &ScopeStore {
        &self.inner.store
    }

    /// 解析指标
    pub fn metrics(&self) -> &Arc<ResolutionMetrics> {
        &self.inner.metrics
    }

    /// 缓存统计
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.store.cache().stats()
    }

    /// 本容器或任一祖先容器是否注册了该键
    pub fn can_resolve(&self, key: &Key) -> bool {
        self.inner.registry.contains(key)
            || self
                .inner
                .parent
                .as_ref()
                .map(|p| p.can_resolve(key))
                .unwrap_or(false)
    }

    /// 是否已关闭
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// 仍有等待者的进行中创建数量
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.active_count()
    }

    /// 按期望类型解析
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` - 本容器及祖先容器都没有注册
    /// - `TypeMismatch` - 实例类型与 `T` 不一致
    /// - `CircularDependency` - 当前调用链上形成环
    /// - `FactoryFailed` - 工厂失败
    /// - `ShutdownInProgress` - 容器已关闭
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// let db: Arc<Database> = resolver.resolve(&Key::new("db")).await?;
    /// ```
    pub async fn resolve<T: Send + Sync + 'static>(&self, key: &Key) -> Result<Arc<T>> {
        self.resolve_instance(key).await?.downcast::<T>(key)
    }

    /// 以类型名作为键解析
    pub async fn resolve_type<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve::<T>(&Key::of::<T>()).await
    }

    /// 解析为类型擦除的实例
    pub async fn resolve_instance(&self, key: &Key) -> Result<Instance> {
        let started = Instant::now();
        let span = crate::resolve_span!(key, self.inner.id);

        let result = self.lookup_or_create(key.clone()).instrument(span).await;
        let elapsed_us = started.elapsed().as_micros() as u64;

        match result {
            Ok((instance, outcome)) => {
                self.inner.metrics.record_resolution(outcome, elapsed_us);
                Ok(instance)
            }
            Err(err) => {
                self.inner
                    .metrics
                    .record_resolution(ResolutionOutcome::Failure, elapsed_us);
                crate::log_resolve_failure!(key, err);
                Err(err)
            }
        }
    }

    fn lookup_or_create(&self, key: Key) -> BoxFuture<'_, Result<(Instance, ResolutionOutcome)>> {
        async move {
            if self.is_shut_down() {
                return Err(DiError::ShutdownInProgress);
            }

            let Some(registration) = self.inner.registry.get(&key) else {
                return match self.inner.parent {
                    Some(ref parent) => {
                        trace!(key = %key, parent = %parent.id(), "交给父容器解析");
                        parent.with_chain(self.chain.clone()).lookup_or_create(key).await
                    }
                    None => Err(DiError::KeyNotFound(key.name().to_string())),
                };
            };

            if let Some(path) = self.chain.cycle_path(&key, &self.inner.id) {
                return Err(DiError::CircularDependency(describe_cycle(&path)));
            }

            let storage = registration.scope().storage();
            if storage == StorageKind::None {
                let instance = self.run_factory(registration, &key).await?;
                return Ok((instance, ResolutionOutcome::Miss));
            }

            if let Some(instance) = self.inner.store.lookup(&key, storage) {
                return Ok((instance, ResolutionOutcome::Hit));
            }

            let holding = self.chain.keys_in(&self.inner.id);
            let flight = self.inner.in_flight.join_or_start(
                &key,
                &holding,
                || self.inner.store.lookup(&key, storage),
                |episode| self.creation(registration.clone(), key.clone(), storage, episode),
            )?;

            match flight {
                Flight::Ready(instance) => Ok((instance, ResolutionOutcome::Hit)),
                Flight::Joined(creation, _waiting) => {
                    trace!(key = %key, "加入进行中的创建");
                    creation.await.map(|i| (i, ResolutionOutcome::Hit))
                }
                Flight::Started(creation) => creation.await.map(|i| (i, ResolutionOutcome::Miss)),
            }
        }
        .boxed()
    }

    /// 构造一轮单飞创建：执行工厂、写入存储、移除表项
    ///
    /// 写入与移除在进行中创建表的锁内完成，关闭之后完成的创建不会写入存储。
    fn creation(
        &self,
        registration: Registration,
        key: Key,
        storage: StorageKind,
        episode: u64,
    ) -> BoxFuture<'static, Result<Instance>> {
        let resolver = self.clone();
        async move {
            let result = resolver.run_factory(&registration, &key).await;
            let inner = &resolver.inner;
            let open = inner.in_flight.complete(&key, episode, || {
                if let Ok(ref instance) = result {
                    inner.store.store(key.clone(), storage, instance);
                }
            });
            if !open {
                return Err(DiError::ShutdownInProgress);
            }
            result
        }
        .boxed()
    }

    async fn run_factory(&self, registration: &Registration, key: &Key) -> Result<Instance> {
        let child = self.with_chain(self.chain.push(key.clone(), self.inner.id.clone()));
        let started = Instant::now();

        let instance = registration
            .create(child)
            .await
            .map_err(|err| DiError::from_factory(registration.name(), err))?;

        trace!(
            key = %key,
            scope = %registration.scope(),
            duration_us = started.elapsed().as_micros() as u64,
            "工厂执行完成"
        );
        Ok(instance)
    }

    fn with_chain(&self, chain: ResolutionChain) -> Resolver {
        Resolver {
            inner: Arc::clone(&self.inner),
            chain,
        }
    }

    fn detached(&self) -> Resolver {
        self.with_chain(ResolutionChain::new())
    }

    /// 关闭解析器
    ///
    /// 之后的解析一律返回 `ShutdownInProgress`；进行中的创建被中止，存储被清空。
    ///
    /// # 返回
    ///
    /// 清除的实例数量
    pub fn shutdown(&self) -> usize {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        // 进行中创建表关闭后不再接受新创建，也不再写入存储
        let aborted = self.inner.in_flight.abort_all();
        let cleared = self.inner.store.clear();
        info!(
            container_id = %self.inner.id,
            aborted,
            cleared,
            "解析器已关闭"
        );
        cleared
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.inner.id)
            .field("registrations", &self.inner.registry.len())
            .field("chain", &self.chain)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
