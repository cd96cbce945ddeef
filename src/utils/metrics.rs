//! 解析指标与内存压力监控
//!
//! 本模块提供解析性能指标收集、内存压力监控和监控数据导出功能。
//!
//! # 功能特性
//!
//! - **解析指标收集**: 命中/未命中/失败计数，解析延迟分布
//! - **内存压力监控**: 周期性采样常驻内存，超过阈值时按比例淘汰缓存
//! - **数据导出**: 支持 JSON 格式导出监控数据
//!
//! # 示例
//!
//! ```rust
//! use chips_di::utils::metrics::{ResolutionMetrics, ResolutionOutcome};
//!
//! let metrics = ResolutionMetrics::new();
//! metrics.record_resolution(ResolutionOutcome::Miss, 1500);
//! metrics.record_resolution(ResolutionOutcome::Hit, 20);
//!
//! assert_eq!(metrics.get_total_resolutions(), 2);
//! let report = metrics.export();
//! let json = report.to_json_pretty().unwrap();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::MemoryPressureConfig;

// ============================================================================
// 常量定义
// ============================================================================

/// 延迟样本的最大数量
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// 假定的内存页大小（字节）
const PAGE_SIZE_BYTES: u64 = 4096;

// ============================================================================
// ResolutionMetrics - 解析指标收集器
// ============================================================================

/// 一次解析的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// 从作用域存储或进行中的创建直接拿到实例
    Hit,
    /// 执行了工厂函数
    Miss,
    /// 解析失败
    Failure,
}

/// 解析指标收集器
///
/// 所有计数器使用 `AtomicU64`，延迟样本使用 `Mutex<Vec<u64>>` 保护。
#[derive(Debug)]
pub struct ResolutionMetrics {
    total_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    failure_count: AtomicU64,
    total_latency_us: AtomicU64,
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,

    /// 延迟样本，用于计算百分位数
    latency_samples: Mutex<Vec<u64>>,

    start_time: DateTime<Utc>,
}

impl ResolutionMetrics {
    /// 创建新的指标收集器
    pub fn new() -> Self {
        Self {
            total_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            min_latency_us: AtomicU64::new(u64::MAX),
            max_latency_us: AtomicU64::new(0),
            latency_samples: Mutex::new(Vec::with_capacity(1000)),
            start_time: Utc::now(),
        }
    }

    /// 记录一次解析
    ///
    /// # 参数
    ///
    /// * `outcome` - 解析结果分类
    /// * `latency_us` - 解析耗时（微秒）
    pub fn record_resolution(&self, outcome: ResolutionOutcome, latency_us: u64) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        let counter = match outcome {
            ResolutionOutcome::Hit => &self.hit_count,
            ResolutionOutcome::Miss => &self.miss_count,
            ResolutionOutcome::Failure => &self.failure_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.min_latency_us.fetch_min(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            // 滑动窗口：超过上限时丢弃较旧的一半
            if samples.len() >= MAX_LATENCY_SAMPLES {
                let half = samples.len() / 2;
                samples.drain(0..half);
            }
            samples.push(latency_us);
        }
    }

    /// 计算指定百分位数的延迟
    ///
    /// # 参数
    ///
    /// * `p` - 百分位数（0.0 到 1.0 之间，越界会被截断）
    ///
    /// # 返回
    ///
    /// 指定百分位数的延迟（微秒），没有样本时返回 0
    pub fn get_percentile(&self, p: f64) -> u64 {
        let p = p.clamp(0.0, 1.0);

        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_unstable();

        // 最近等级法
        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx.min(sorted.len() - 1)]
    }

    /// 平均延迟（微秒）
    pub fn get_average_latency(&self) -> u64 {
        let total = self.total_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / total
    }

    /// 最小延迟（微秒）
    pub fn get_min_latency(&self) -> u64 {
        match self.min_latency_us.load(Ordering::Relaxed) {
            u64::MAX => 0,
            min => min,
        }
    }

    /// 最大延迟（微秒）
    pub fn get_max_latency(&self) -> u64 {
        self.max_latency_us.load(Ordering::Relaxed)
    }

    /// 解析总次数
    pub fn get_total_resolutions(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// 命中次数
    pub fn get_hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// 未命中次数（执行了工厂）
    pub fn get_miss_count(&self) -> u64 {
        self.miss_count.load(Ordering::Relaxed)
    }

    /// 失败次数
    pub fn get_failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// 命中率（成功解析中命中的比例，没有成功解析时为 0）
    pub fn get_hit_rate(&self) -> f64 {
        let hits = self.get_hit_count();
        let succeeded = hits + self.get_miss_count();
        if succeeded == 0 {
            return 0.0;
        }
        hits as f64 / succeeded as f64
    }

    /// 失败率（0.0 到 1.0）
    pub fn get_failure_rate(&self) -> f64 {
        let total = self.get_total_resolutions();
        if total == 0 {
            return 0.0;
        }
        self.get_failure_count() as f64 / total as f64
    }

    /// 吞吐量（每秒解析次数）
    pub fn get_throughput(&self) -> f64 {
        let total = self.get_total_resolutions();
        let seconds = Utc::now()
            .signed_duration_since(self.start_time)
            .num_seconds();
        if seconds <= 0 {
            return total as f64;
        }
        total as f64 / seconds as f64
    }

    /// 导出指标报告
    pub fn export(&self) -> MetricsReport {
        MetricsReport {
            timestamp: Utc::now(),
            uptime_seconds: Utc::now()
                .signed_duration_since(self.start_time)
                .num_seconds()
                .max(0) as u64,
            resolution: ResolutionStats {
                total_resolutions: self.get_total_resolutions(),
                hits: self.get_hit_count(),
                misses: self.get_miss_count(),
                failures: self.get_failure_count(),
                hit_rate: self.get_hit_rate(),
                failure_rate: self.get_failure_rate(),
                throughput_per_second: self.get_throughput(),
            },
            latency: LatencyMetrics {
                avg_latency_us: self.get_average_latency(),
                min_latency_us: self.get_min_latency(),
                max_latency_us: self.get_max_latency(),
                p50_latency_us: self.get_percentile(0.50),
                p95_latency_us: self.get_percentile(0.95),
                p99_latency_us: self.get_percentile(0.99),
            },
            memory: None,
        }
    }

    /// 重置所有统计数据
    pub fn reset(&self) {
        for counter in [
            &self.total_count,
            &self.hit_count,
            &self.miss_count,
            &self.failure_count,
            &self.total_latency_us,
            &self.max_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_latency_us.store(u64::MAX, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.clear();
        }
    }
}

impl Default for ResolutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryPressureMonitor - 内存压力监控器
// ============================================================================

/// 可在内存压力下被淘汰的存储
pub trait EvictionTarget: Send + Sync {
    /// 用于日志的名称
    fn target_name(&self) -> String;

    /// 淘汰约 `fraction` 比例的条目，返回实际淘汰数量
    fn evict_fraction(&self, fraction: f64) -> usize;
}

/// 内存状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatus {
    /// 常驻内存（MB），平台不支持时为 None
    pub resident_mb: Option<u64>,

    /// 是否超过阈值
    pub over_threshold: bool,

    /// 本次检查淘汰的条目数
    pub evicted: usize,

    /// 检查时间
    pub checked_at: DateTime<Utc>,
}

/// 内存压力监控器
///
/// 定期读取进程常驻内存，超过阈值时要求所有已注册的缓存淘汰一部分条目。
pub struct MemoryPressureMonitor {
    config: MemoryPressureConfig,
    targets: RwLock<Vec<Arc<dyn EvictionTarget>>>,
    last_status: RwLock<Option<MemoryStatus>>,
    pressure_events: AtomicU64,
}

impl MemoryPressureMonitor {
    /// 创建监控器
    pub fn new(config: MemoryPressureConfig) -> Self {
        Self {
            config,
            targets: RwLock::new(Vec::new()),
            last_status: RwLock::new(None),
            pressure_events: AtomicU64::new(0),
        }
    }

    /// 注册一个淘汰目标
    pub fn add_target(&self, target: Arc<dyn EvictionTarget>) {
        if let Ok(mut targets) = self.targets.write() {
            targets.push(target);
        }
    }

    /// 当前配置
    pub fn config(&self) -> &MemoryPressureConfig {
        &self.config
    }

    /// 采样一次内存并在超过阈值时淘汰
    pub fn check(&self) -> MemoryStatus {
        self.evaluate(resident_memory_mb())
    }

    /// 按给定的内存读数判断是否需要淘汰
    pub fn evaluate(&self, resident_mb: Option<u64>) -> MemoryStatus {
        let over_threshold = resident_mb
            .map(|mb| mb > self.config.memory_threshold_mb)
            .unwrap_or(false);

        let evicted = if over_threshold {
            warn!(
                resident_mb = resident_mb.unwrap_or_default(),
                threshold_mb = self.config.memory_threshold_mb,
                "内存使用超过阈值，开始淘汰缓存"
            );
            self.relieve()
        } else {
            0
        };

        let status = MemoryStatus {
            resident_mb,
            over_threshold,
            evicted,
            checked_at: Utc::now(),
        };
        if let Ok(mut last) = self.last_status.write() {
            *last = Some(status.clone());
        }
        status
    }

    /// 无条件按配置比例淘汰所有目标，返回淘汰总数
    pub fn relieve(&self) -> usize {
        self.pressure_events.fetch_add(1, Ordering::Relaxed);
        let targets = match self.targets.read() {
            Ok(targets) => targets.clone(),
            Err(_) => return 0,
        };

        let fraction = self.config.eviction_fraction;
        let mut total = 0;
        for target in targets {
            let evicted = target.evict_fraction(fraction);
            debug!(target = %target.target_name(), evicted, "内存压力淘汰");
            total += evicted;
        }
        info!(evicted = total, fraction, "内存压力处理完成");
        total
    }

    /// 上次检查的状态
    pub fn get_last_status(&self) -> Option<MemoryStatus> {
        self.last_status.read().ok().and_then(|s| s.clone())
    }

    /// 触发淘汰的次数
    pub fn get_pressure_events(&self) -> u64 {
        self.pressure_events.load(Ordering::Relaxed)
    }

    /// 启动后台采样任务
    ///
    /// 任务只持有监控器的弱引用，监控器释放后自行退出；调用方也可以 abort 返回的句柄。
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.check_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即完成
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.check();
            }
        })
    }
}

impl std::fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("config", &self.config)
            .field("pressure_events", &self.get_pressure_events())
            .finish()
    }
}

/// 读取进程常驻内存（MB）
///
/// 仅 Linux 下通过 `/proc/self/statm` 获取，其他平台返回 None。
pub fn resident_memory_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = content.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * PAGE_SIZE_BYTES / (1024 * 1024))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = PAGE_SIZE_BYTES;
        None
    }
}

// ============================================================================
// 监控数据报告结构
// ============================================================================

/// 解析统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// 解析总次数
    pub total_resolutions: u64,
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 失败次数
    pub failures: u64,
    /// 命中率
    pub hit_rate: f64,
    /// 失败率
    pub failure_rate: f64,
    /// 每秒解析次数
    pub throughput_per_second: f64,
}

/// 延迟统计指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 平均延迟（微秒）
    pub avg_latency_us: u64,
    /// 最小延迟（微秒）
    pub min_latency_us: u64,
    /// 最大延迟（微秒）
    pub max_latency_us: u64,
    /// P50 延迟（微秒）
    pub p50_latency_us: u64,
    /// P95 延迟（微秒）
    pub p95_latency_us: u64,
    /// P99 延迟（微秒）
    pub p99_latency_us: u64,
}

/// 完整的监控报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// 报告生成时间
    pub timestamp: DateTime<Utc>,
    /// 运行时长（秒）
    pub uptime_seconds: u64,
    /// 解析统计
    pub resolution: ResolutionStats,
    /// 延迟统计
    pub latency: LatencyMetrics,
    /// 最近一次内存检查（未启用监控时为 None）
    pub memory: Option<MemoryStatus>,
}

impl MetricsReport {
    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 序列化为格式化的 JSON 字符串
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// 单元测试
// ============================================================================
