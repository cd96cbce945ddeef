//! 启动协调器
//!
//! 把预热层的注册项按依赖分层，逐层并发初始化：
//!
//! - 第 i 层全部结束（无论成败）后才开始第 i+1 层
//! - 同一层内的键作为独立任务运行，受并发限制器约束
//! - 单个键失败不影响兄弟任务，全部结束后汇总为 `PartialInitializationFailure`
//! - 每完成一个键回报一次累计进度 `completed / total`

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::core::config::StartupConfig;
use crate::graph::DependencyAnalyzer;
use crate::registry::{Key, Registry};
use crate::resolver::Resolver;
use crate::startup::concurrency::ConcurrencyLimiter;
use crate::utils::{generate_uuid, DiError, Result};

/// 单个键的初始化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTiming {
    /// 键名
    pub key: String,
    /// 所在层（从 0 开始）
    pub layer: usize,
    /// 耗时（微秒）
    pub duration_us: u64,
    /// 是否成功
    pub succeeded: bool,
}

/// 一次预热的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupMetrics {
    /// 运行 ID
    pub run_id: String,
    /// 预热键总数
    pub total: usize,
    /// 层数
    pub layer_count: usize,
    /// 并发上限
    pub worker_limit: usize,
    /// 成功的键
    pub successful: Vec<String>,
    /// 失败的键
    pub failed: Vec<String>,
    /// 每个键的记录，按完成顺序
    pub timings: Vec<KeyTiming>,
    /// 总墙钟耗时（微秒）
    pub wall_clock_us: u64,
    /// 各键耗时之和（微秒）
    pub total_duration_us: u64,
    /// 并行效率
    pub parallelization_efficiency: f64,
}

impl StartupMetrics {
    /// 是否全部成功
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 并行效率：`min(1, (Σ耗时 / 墙钟) / 并发上限)`，墙钟为 0 时为 0
pub fn parallelization_efficiency(total: Duration, wall_clock: Duration, worker_limit: usize) -> f64 {
    if wall_clock.is_zero() || worker_limit == 0 {
        return 0.0;
    }
    let speedup = total.as_secs_f64() / wall_clock.as_secs_f64();
    (speedup / worker_limit as f64).min(1.0)
}

/// 启动协调器
pub struct StartupCoordinator {
    limiter: ConcurrencyLimiter,
    eager_layer: String,
    running: Mutex<Vec<AbortHandle>>,
    last_metrics: Mutex<Option<StartupMetrics>>,
}

impl StartupCoordinator {
    /// 按启动配置创建
    pub fn new(config: &StartupConfig) -> Self {
        Self::with_limit(config.max_concurrency, config.eager_layer.clone())
    }

    /// 指定并发上限与预热层名称
    pub fn with_limit(max_concurrency: usize, eager_layer: impl Into<String>) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(max_concurrency),
            eager_layer: eager_layer.into(),
            running: Mutex::new(Vec::new()),
            last_metrics: Mutex::new(None),
        }
    }

    /// 预热层名称
    pub fn eager_layer(&self) -> &str {
        &self.eager_layer
    }

    /// 并发限制器
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// 最近一次预热的统计
    pub fn last_metrics(&self) -> Option<StartupMetrics> {
        lock(&self.last_metrics).clone()
    }

    /// 是否已拆除
    pub fn is_shut_down(&self) -> bool {
        self.limiter.is_closed()
    }

    /// 预热层的分层结果（祖先容器提供的键视为外部键）
    ///
    /// # Errors
    ///
    /// 预热层子图存在缺失依赖或环时返回对应的校验错误
    pub fn eager_layers(&self, registry: &Registry, resolver: &Resolver) -> Result<Vec<Vec<Key>>> {
        let analysis = DependencyAnalyzer::new(registry)
            .with_external(|key| resolver.parent().map(|p| p.can_resolve(key)).unwrap_or(false))
            .analyze_subset(|r| r.scope().is_layer(&self.eager_layer));
        analysis.into_result()
    }

    /// 逐层初始化预热层
    ///
    /// # 参数
    ///
    /// * `registry` - 注册表
    /// * `resolver` - 用于解析的解析器
    /// * `on_progress` - 每完成一个键调用一次，参数为 `(completed, total)`
    ///
    /// # 返回
    ///
    /// 全部成功时返回统计；统计无论成败都可以通过 [`last_metrics`](Self::last_metrics) 取得
    ///
    /// # Errors
    ///
    /// - `PartialInitializationFailure` - 部分键失败
    /// - `CoordinatorUnavailable` - 协调器已拆除
    pub async fn initialize_eager_layer<F>(
        &self,
        registry: &Registry,
        resolver: &Resolver,
        mut on_progress: F,
    ) -> Result<StartupMetrics>
    where
        F: FnMut(usize, usize) + Send,
    {
        if self.is_shut_down() {
            return Err(DiError::CoordinatorUnavailable("启动协调器已拆除".to_string()));
        }

        let layers = self.eager_layers(registry, resolver)?;
        let run_id = generate_uuid();
        let total: usize = layers.iter().map(Vec::len).sum();
        let worker_limit = self.limiter.max_concurrency();
        let span = tracing::info_span!("warmup", run_id = %run_id, layer = %self.eager_layer);

        async {
            info!(total, layers = layers.len(), worker_limit, "开始预热");

            let started = Instant::now();
            let mut timings = Vec::with_capacity(total);
            let mut successful = Vec::new();
            let mut failed: Vec<(String, DiError)> = Vec::new();
            let mut completed = 0usize;

            for (index, layer) in layers.iter().enumerate() {
                debug!(layer = index, keys = layer.len(), "开始初始化层");
                let mut tasks = self.spawn_layer(layer, resolver);

                while let Some((key, outcome)) = tasks.next().await {
                    let (duration, result) = match outcome {
                        Ok(done) => done,
                        Err(join_error) => (
                            Duration::ZERO,
                            Err(DiError::CoordinatorUnavailable(format!(
                                "'{}' 的初始化任务被中止: {}",
                                key, join_error
                            ))),
                        ),
                    };

                    timings.push(KeyTiming {
                        key: key.name().to_string(),
                        layer: index,
                        duration_us: duration.as_micros() as u64,
                        succeeded: result.is_ok(),
                    });
                    match result {
                        Ok(()) => {
                            debug!(key = %key, duration_us = duration.as_micros() as u64, "初始化完成");
                            successful.push(key.name().to_string());
                        }
                        Err(err) => {
                            warn!(key = %key, error_code = err.error_code(), error = %err, "初始化失败");
                            failed.push((key.name().to_string(), err));
                        }
                    }

                    completed += 1;
                    on_progress(completed, total);
                }
                lock(&self.running).clear();
            }

            let wall_clock = started.elapsed();
            let total_duration: Duration = timings
                .iter()
                .map(|t| Duration::from_micros(t.duration_us))
                .sum();
            let metrics = StartupMetrics {
                run_id: run_id.clone(),
                total,
                layer_count: layers.len(),
                worker_limit,
                successful: successful.clone(),
                failed: failed.iter().map(|(k, _)| k.clone()).collect(),
                timings,
                wall_clock_us: wall_clock.as_micros() as u64,
                total_duration_us: total_duration.as_micros() as u64,
                parallelization_efficiency: parallelization_efficiency(
                    total_duration,
                    wall_clock,
                    worker_limit,
                ),
            };
            *lock(&self.last_metrics) = Some(metrics.clone());

            info!(
                successful = metrics.successful.len(),
                failed = metrics.failed.len(),
                wall_clock_us = metrics.wall_clock_us,
                efficiency = metrics.parallelization_efficiency,
                "预热结束"
            );

            if failed.is_empty() {
                Ok(metrics)
            } else {
                Err(DiError::PartialInitializationFailure { successful, failed })
            }
        }
        .instrument(span)
        .await
    }

    /// 为一层的每个键启动一个任务
    fn spawn_layer(
        &self,
        layer: &[Key],
        resolver: &Resolver,
    ) -> FuturesUnordered<impl std::future::Future<Output = (Key, LayerOutcome)>> {
        let tasks = FuturesUnordered::new();
        let mut running = lock(&self.running);

        for key in layer {
            let limiter = self.limiter.clone();
            let resolver = resolver.clone();
            let task_key = key.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = match limiter.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(err) => return (Duration::ZERO, Err(err)),
                    };
                    let started = Instant::now();
                    let result = resolver.resolve_instance(&task_key).await.map(|_| ());
                    (started.elapsed(), result)
                }
                .in_current_span(),
            );
            running.push(handle.abort_handle());

            let key = key.clone();
            tasks.push(async move { (key, handle.await) });
        }
        tasks
    }

    /// 拆除协调器
    ///
    /// 关闭并发限制器并中止正在运行的任务，之后的预热一律返回 `CoordinatorUnavailable`。
    pub fn shutdown(&self) {
        if self.limiter.is_closed() {
            return;
        }
        self.limiter.close();
        let handles: Vec<AbortHandle> = lock(&self.running).drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        info!(aborted = handles.len(), "启动协调器已拆除");
    }
}

type LayerOutcome = std::result::Result<(Duration, Result<()>), tokio::task::JoinError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for StartupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupCoordinator")
            .field("eager_layer", &self.eager_layer)
            .field("limiter", &self.limiter)
            .finish()
    }
}
