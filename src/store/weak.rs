//! 弱引用存储
//!
//! 只保存实例的弱引用。外部持有者全部释放后，条目在下一次查询时被清除。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::registry::{Instance, Key, WeakInstance};
use crate::utils::{DiError, Result};

/// 弱引用存储
#[derive(Debug, Default)]
pub struct WeakStore {
    entries: Mutex<HashMap<Key, WeakInstance>>,
}

impl WeakStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Key, WeakInstance>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查询实例
    ///
    /// # 返回
    ///
    /// 没有条目时返回 `Ok(None)`
    ///
    /// # Errors
    ///
    /// 条目存在但目标已释放时返回 `WeakTargetDeallocated`，同时移除该条目
    pub fn get(&self, key: &Key) -> Result<Option<Instance>> {
        let mut entries = self.entries();
        let Some(weak) = entries.get(key) else {
            return Ok(None);
        };

        match weak.upgrade() {
            Some(instance) => Ok(Some(instance)),
            None => {
                entries.remove(key);
                trace!(key = %key, "弱引用目标已释放");
                Err(DiError::WeakTargetDeallocated(key.name().to_string()))
            }
        }
    }

    /// 写入实例的弱引用
    pub fn insert(&self, key: Key, instance: &Instance) {
        self.entries().insert(key, instance.downgrade());
    }

    /// 移除条目
    pub fn remove(&self, key: &Key) -> bool {
        self.entries().remove(key).is_some()
    }

    /// 清除所有目标已释放的条目，返回清除数量
    pub fn purge_dead(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, weak| weak.is_alive());
        before - entries.len()
    }

    /// 目标仍存活的条目数量
    pub fn live_count(&self) -> usize {
        self.entries().values().filter(|w| w.is_alive()).count()
    }

    /// 清空，返回清除的数量
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }
}
