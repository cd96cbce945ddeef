//! 作用域存储
//!
//! 按作用域分为三个独立的存储，每个存储各自持有一把互斥锁，且锁不会跨越 `.await`：
//!
//! - [`PermanentStore`] - `Permanent` 与具名层
//! - [`WeakStore`] - `Weak`
//! - [`TtlCache`] - `Cached`
//!
//! `Transient` 不存储。

pub mod cache;
pub mod permanent;
pub mod weak;

pub use cache::{CacheStats, TtlCache};
pub use permanent::PermanentStore;
pub use weak::WeakStore;

use std::sync::Arc;

use tracing::debug;

use crate::core::config::CacheConfig;
use crate::registry::{Instance, Key, StorageKind};
use crate::utils::DiError;

/// 容器的作用域存储集合
#[derive(Debug)]
pub struct ScopeStore {
    permanent: PermanentStore,
    weak: WeakStore,
    cache: Arc<TtlCache>,
}

impl ScopeStore {
    /// 按缓存配置创建
    pub fn new(cache_config: &CacheConfig) -> Self {
        Self {
            permanent: PermanentStore::new(),
            weak: WeakStore::new(),
            cache: Arc::new(TtlCache::from_config(cache_config)),
        }
    }

    /// 按存储位置查询
    ///
    /// 弱引用目标已释放视为未命中。
    pub fn lookup(&self, key: &Key, storage: StorageKind) -> Option<Instance> {
        match storage {
            StorageKind::Permanent => self.permanent.get(key),
            StorageKind::Cached => self.cache.get(key),
            StorageKind::Weak => match self.weak.get(key) {
                Ok(found) => found,
                Err(DiError::WeakTargetDeallocated(_)) => {
                    debug!(key = %key, "弱引用目标已释放，重新创建");
                    None
                }
                Err(_) => None,
            },
            StorageKind::None => None,
        }
    }

    /// 按存储位置写入
    pub fn store(&self, key: Key, storage: StorageKind, instance: &Instance) {
        match storage {
            StorageKind::Permanent => {
                self.permanent.insert(key, instance.clone());
            }
            StorageKind::Cached => self.cache.insert(key, instance.clone()),
            StorageKind::Weak => self.weak.insert(key, instance),
            StorageKind::None => {}
        }
    }

    /// 永久存储
    pub fn permanent(&self) -> &PermanentStore {
        &self.permanent
    }

    /// 弱引用存储
    pub fn weak(&self) -> &WeakStore {
        &self.weak
    }

    /// TTL 缓存
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    /// 清空全部存储，返回清除的条目数
    pub fn clear(&self) -> usize {
        self.permanent.clear() + self.weak.clear() + self.cache.clear()
    }
}
