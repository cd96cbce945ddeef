//! 并发控制
//!
//! 预热阶段用信号量限制同时运行的工厂数量。限制器关闭后，排队中的任务
//! 立即得到 `CoordinatorUnavailable`。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::utils::{DiError, Result};

/// 默认并发上限
pub const MAX_DEFAULT_CONCURRENCY: usize = 8;

// ==================== 并发控制器 ====================

/// 并发限制器
///
/// 使用 tokio 的 Semaphore 实现。默认并发数为 `min(CPU 核心数, 8)`。
///
/// # 示例
///
/// ```rust
/// use chips_di::startup::ConcurrencyLimiter;
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = ConcurrencyLimiter::new(2);
///     let permit = limiter.acquire_owned().await.unwrap();
///     assert_eq!(limiter.current_concurrency(), 1);
///     drop(permit);
///     assert_eq!(limiter.available_permits(), 2);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl ConcurrencyLimiter {
    /// 创建新的并发限制器
    ///
    /// # 参数
    ///
    /// * `max_concurrency` - 最大并发数，0 按 1 处理
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        debug!(max_concurrency, "创建并发限制器");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// 按 CPU 核心数创建
    pub fn default_concurrency() -> Self {
        Self::new(default_worker_limit())
    }

    /// 获取一个拥有所有权的许可（等待直到有可用许可）
    ///
    /// # Errors
    ///
    /// 限制器已关闭时返回 `CoordinatorUnavailable`
    pub async fn acquire_owned(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DiError::CoordinatorUnavailable("并发限制器已关闭".to_string()))
    }

    /// 尝试获取许可（非阻塞）
    pub fn try_acquire_owned(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// 关闭限制器，唤醒并拒绝所有排队者
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// 当前正在使用的并发数
    pub fn current_concurrency(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    /// 可用许可数
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 最大并发数
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 是否已达到最大并发数
    pub fn is_at_capacity(&self) -> bool {
        self.available_permits() == 0
    }

    /// 并发使用率（0.0 - 1.0）
    pub fn utilization(&self) -> f64 {
        self.current_concurrency() as f64 / self.max_concurrency as f64
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::default_concurrency()
    }
}

/// 默认工作者上限：`min(CPU 核心数, 8)`
pub fn default_worker_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrency_limiter_new() {
        let limiter = ConcurrencyLimiter::new(10);
        assert_eq!(limiter.max_concurrency(), 10);
        assert_eq!(limiter.available_permits(), 10);
        assert_eq!(limiter.current_concurrency(), 0);
    }

    #[tokio::test]
    async fn test_zero_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_default_limit_bounded() {
        let limiter = ConcurrencyLimiter::default();
        assert!(limiter.max_concurrency() >= 1);
        assert!(limiter.max_concurrency() <= MAX_DEFAULT_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);

        let p1 = limiter.acquire_owned().await.unwrap();
        let p2 = limiter.try_acquire_owned();
        assert!(p2.is_some());
        assert!(limiter.is_at_capacity());
        assert!(limiter.try_acquire_owned().is_none());
        assert!((limiter.utilization() - 1.0).abs() < f64::EPSILON);

        drop(p1);
        drop(p2);
        assert_eq!(limiter.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.acquire_owned().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire_owned().await })
        };
        tokio::task::yield_now().await;

        limiter.close();
        assert!(limiter.is_closed());
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DiError::CoordinatorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_access_bounded() {
        let limiter = ConcurrencyLimiter::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
