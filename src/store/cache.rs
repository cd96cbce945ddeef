//! TTL 缓存
//!
//! `Cached` 作用域的存储，容量与存活时间受限：
//!
//! - 条目按访问顺序（LRU）或写入顺序（FIFO）排列，容量满时淘汰最旧的一个
//! - 过期时间记录在最小堆中，每次访问前先清理已过期条目
//! - 堆中的记录带代号，条目被替换或移除后旧记录自然失效，失效记录过多时整体压缩
//!
//! 时间使用 `tokio::time::Instant`，测试中可以暂停并推进时钟。

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::config::{CacheConfig, EvictionPolicy};
use crate::registry::{Instance, Key};
use crate::utils::metrics::EvictionTarget;

/// 堆中失效记录的压缩阈值
const HEAP_COMPACT_SLACK: usize = 64;

#[derive(Debug)]
struct CacheEntry {
    instance: Instance,
    created_at: Instant,
    expires_at: Instant,
    generation: u64,
}

#[derive(Debug)]
struct CacheInner {
    order: LruCache<Key, CacheEntry>,
    expirations: BinaryHeap<Reverse<(Instant, u64, Key)>>,
    next_generation: u64,
}

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 因容量或内存压力被淘汰的条目数
    pub evictions: u64,
    /// 过期清除的条目数
    pub expirations: u64,
    /// 当前条目数
    pub size: usize,
    /// 容量
    pub capacity: usize,
}

/// TTL 缓存
#[derive(Debug)]
pub struct TtlCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl TtlCache {
    /// 创建缓存
    ///
    /// # 参数
    ///
    /// * `max_size` - 最大条目数（0 按 1 处理）
    /// * `ttl` - 条目存活时间
    /// * `policy` - 淘汰策略
    pub fn new(max_size: usize, ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                order: LruCache::unbounded(),
                expirations: BinaryHeap::new(),
                next_generation: 0,
            }),
            max_size: max_size.max(1),
            ttl,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// 按配置创建缓存
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl(), config.eviction_policy)
    }

    fn inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查询实例
    ///
    /// LRU 策略下命中会刷新顺序，FIFO 策略下不影响顺序。
    pub fn get(&self, key: &Key) -> Option<Instance> {
        let mut inner = self.inner();
        self.sweep_expired(&mut inner, Instant::now());

        let found = match self.policy {
            EvictionPolicy::Lru => inner.order.get(key),
            EvictionPolicy::Fifo => inner.order.peek(key),
        }
        .map(|entry| entry.instance.clone());

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// 写入实例
    ///
    /// 已存在的键会被替换并重新计算过期时间；容量已满时先淘汰最旧的条目。
    pub fn insert(&self, key: Key, instance: Instance) {
        let now = Instant::now();
        let mut inner = self.inner();
        self.sweep_expired(&mut inner, now);

        inner.order.pop(&key);
        while inner.order.len() >= self.max_size {
            match inner.order.pop_lru() {
                Some((evicted, _)) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %evicted, policy = %self.policy, "缓存容量淘汰");
                }
                None => break,
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let expires_at = now + self.ttl;

        inner.order.put(
            key.clone(),
            CacheEntry {
                instance,
                created_at: now,
                expires_at,
                generation,
            },
        );
        inner.expirations.push(Reverse((expires_at, generation, key)));
        Self::compact_heap(&mut inner);
    }

    /// 移除条目
    pub fn remove(&self, key: &Key) -> Option<Instance> {
        self.inner().order.pop(key).map(|entry| entry.instance)
    }

    /// 是否包含未过期的条目（不影响顺序与统计）
    pub fn contains(&self, key: &Key) -> bool {
        let now = Instant::now();
        self.inner()
            .order
            .peek(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    /// 条目已存在的时长
    pub fn age(&self, key: &Key) -> Option<Duration> {
        self.inner()
            .order
            .peek(key)
            .map(|entry| Instant::now().saturating_duration_since(entry.created_at))
    }

    /// 淘汰约 `fraction` 比例的条目（向上取整），返回淘汰数量
    pub fn evict_fraction(&self, fraction: f64) -> usize {
        let mut inner = self.inner();
        self.sweep_expired(&mut inner, Instant::now());

        let len = inner.order.len();
        let target = ((len as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let mut evicted = 0;
        while evicted < target.min(len) {
            if inner.order.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        Self::compact_heap(&mut inner);
        debug!(evicted, remaining = inner.order.len(), "按比例淘汰缓存");
        evicted
    }

    /// 立即清理过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner();
        self.sweep_expired(&mut inner, Instant::now())
    }

    /// 清空，返回清除的数量
    pub fn clear(&self) -> usize {
        let mut inner = self.inner();
        let count = inner.order.len();
        inner.order.clear();
        inner.expirations.clear();
        count
    }

    /// 当前条目数（含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.inner().order.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按淘汰顺序列出键（最先被淘汰的在前）
    pub fn keys_in_eviction_order(&self) -> Vec<Key> {
        let inner = self.inner();
        inner.order.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// 淘汰策略
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.max_size,
        }
    }

    fn sweep_expired(&self, inner: &mut CacheInner, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(Reverse((expires_at, generation, _))) = inner.expirations.peek() {
            if *expires_at > now {
                break;
            }
            let generation = *generation;
            let Some(Reverse((_, _, key))) = inner.expirations.pop() else {
                break;
            };

            let current = inner
                .order
                .peek(&key)
                .map(|entry| entry.generation == generation)
                .unwrap_or(false);
            if current {
                inner.order.pop(&key);
                expired += 1;
                trace!(key = %key, "缓存条目过期");
            }
        }
        if expired > 0 {
            self.expirations.fetch_add(expired as u64, Ordering::Relaxed);
        }
        expired
    }

    fn compact_heap(inner: &mut CacheInner) {
        if inner.expirations.len() <= inner.order.len() * 2 + HEAP_COMPACT_SLACK {
            return;
        }
        let order = &inner.order;
        inner.expirations.retain(|Reverse((_, generation, key))| {
            order
                .peek(key)
                .map(|entry| entry.generation == *generation)
                .unwrap_or(false)
        });
    }
}

impl EvictionTarget for TtlCache {
    fn target_name(&self) -> String {
        format!("ttl_cache({})", self.policy)
    }

    fn evict_fraction(&self, fraction: f64) -> usize {
        TtlCache::evict_fraction(self, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(name: &str) -> Key {
        Key::new(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl() {
        let cache = TtlCache::new(10, Duration::from_secs(5), EvictionPolicy::Lru);
        let instance = Instance::new(1u32);
        cache.insert(k("a"), instance.clone());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get(&k("a")).unwrap().ptr_eq(&instance));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_miss() {
        let cache = TtlCache::new(10, Duration::from_secs(5), EvictionPolicy::Lru);
        cache.insert(k("a"), Instance::new(1u32));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get(&k("a")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_refreshes_expiration() {
        let cache = TtlCache::new(10, Duration::from_secs(5), EvictionPolicy::Lru);
        cache.insert(k("a"), Instance::new(1u32));
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.insert(k("a"), Instance::new(2u32));
        tokio::time::advance(Duration::from_secs(3)).await;

        // 旧的过期记录已失效，不会清除新条目
        let value = cache.get(&k("a")).unwrap().downcast::<u32>(&k("a")).unwrap();
        assert_eq!(*value, 2);
        assert_eq!(cache.stats().expirations, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_access() {
        let cache = TtlCache::new(2, Duration::from_secs(60), EvictionPolicy::Lru);
        cache.insert(k("a"), Instance::new(1u8));
        cache.insert(k("b"), Instance::new(2u8));
        cache.get(&k("a"));
        cache.insert(k("c"), Instance::new(3u8));

        assert!(cache.contains(&k("a")));
        assert!(!cache.contains(&k("b")));
        assert!(cache.contains(&k("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_ignores_access() {
        let cache = TtlCache::new(2, Duration::from_secs(60), EvictionPolicy::Fifo);
        cache.insert(k("a"), Instance::new(1u8));
        cache.insert(k("b"), Instance::new(2u8));
        cache.get(&k("a"));
        cache.insert(k("c"), Instance::new(3u8));

        assert!(!cache.contains(&k("a")));
        assert!(cache.contains(&k("b")));
        assert!(cache.contains(&k("c")));
    }

    #[tokio::test]
    async fn test_size_never_exceeds_capacity() {
        let cache = TtlCache::new(3, Duration::from_secs(60), EvictionPolicy::Lru);
        for i in 0..10 {
            cache.insert(k(&format!("k{}", i)), Instance::new(i));
            assert!(cache.len() <= 3);
        }
        assert_eq!(
            cache.keys_in_eviction_order(),
            vec![k("k7"), k("k8"), k("k9")]
        );
    }

    #[tokio::test]
    async fn test_evict_fraction() {
        let cache = TtlCache::new(100, Duration::from_secs(60), EvictionPolicy::Fifo);
        for i in 0..8 {
            cache.insert(k(&format!("k{}", i)), Instance::new(i));
        }

        assert_eq!(cache.evict_fraction(0.25), 2);
        assert_eq!(cache.len(), 6);
        assert!(!cache.contains(&k("k0")));
        assert!(!cache.contains(&k("k1")));
        assert!(cache.contains(&k("k2")));

        assert_eq!(cache.evict_fraction(0.0), 0);
        assert_eq!(cache.evict_fraction(1.0), 6);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heap_compaction_keeps_heap_bounded() {
        let cache = TtlCache::new(1, Duration::from_secs(60), EvictionPolicy::Lru);
        for i in 0..1000u32 {
            cache.insert(k("same"), Instance::new(i));
        }
        let heap_len = cache.inner().expirations.len();
        assert!(heap_len <= 2 + HEAP_COMPACT_SLACK + 1, "heap_len={}", heap_len);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = TtlCache::new(10, Duration::from_secs(60), EvictionPolicy::Lru);
        cache.insert(k("a"), Instance::new(1u8));
        cache.insert(k("b"), Instance::new(2u8));

        assert!(cache.remove(&k("a")).is_some());
        assert!(cache.remove(&k("a")).is_none());
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
