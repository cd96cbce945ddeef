//! 永久存储
//!
//! 保存 `Permanent` 与具名层作用域的实例，直到容器关闭。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::registry::{Instance, Key};

/// 永久存储
#[derive(Debug, Default)]
pub struct PermanentStore {
    entries: Mutex<HashMap<Key, Instance>>,
}

impl PermanentStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Key, Instance>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查询实例
    pub fn get(&self, key: &Key) -> Option<Instance> {
        self.entries().get(key).cloned()
    }

    /// 写入实例，返回旧值
    pub fn insert(&self, key: Key, instance: Instance) -> Option<Instance> {
        self.entries().insert(key, instance)
    }

    /// 移除实例
    pub fn remove(&self, key: &Key) -> Option<Instance> {
        self.entries().remove(key)
    }

    /// 是否包含
    pub fn contains(&self, key: &Key) -> bool {
        self.entries().contains_key(key)
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// 清空，返回清除的数量
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }
}
