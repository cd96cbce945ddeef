//! 注册表
//!
//! 保存键到注册项的映射。注册表本身不做任何校验，校验由图分析器在构建期完成。
//! 容器构建完成后注册表以 `Arc<Registry>` 共享，之后不再修改。

mod instance;
mod key;
mod registration;
mod scope;

pub use instance::{Instance, WeakInstance};
pub use key::Key;
pub use registration::{BoxedFactory, Registration};
pub use scope::{Scope, StorageKind, EAGER_LAYER, ON_DEMAND_LAYER};

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::utils::Result;

/// 注册表
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<Key, Registration>,
}

impl Registry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入注册项
    ///
    /// 同一个键重复注册时后写入者生效，并记录警告。
    ///
    /// # 返回
    ///
    /// 被覆盖的旧注册项
    pub fn register(&mut self, registration: Registration) -> Option<Registration> {
        let key = registration.key().clone();
        debug!(key = %key, scope = %registration.scope(), "写入注册项");

        let previous = self.entries.insert(key.clone(), registration);
        if previous.is_some() {
            warn!(key = %key, "注册项被覆盖");
        }
        previous
    }

    /// 查询注册项
    pub fn get(&self, key: &Key) -> Option<&Registration> {
        self.entries.get(key)
    }

    /// 是否包含指定键
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// 注册项数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按键排序的注册项快照
    pub fn get_all(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(b.key()));
        all
    }

    /// 按键排序的全部键
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 属于指定层的键（已排序）
    pub fn keys_in_layer(&self, layer: &str) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .entries
            .values()
            .filter(|r| r.scope().is_layer(layer))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

/// 注册项来源
///
/// 容器在 `configuring` 阶段依次调用每个来源，把注册项写入同一个注册表。
#[async_trait]
pub trait RegistrationSource: Send + Sync {
    /// 来源名称（用于日志）
    fn name(&self) -> &str;

    /// 把注册项写入注册表，返回写入数量
    async fn collect(&self, registry: &mut Registry) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(key: &str, scope: Scope, deps: &[&str]) -> Registration {
        Registration::new(
            Key::new(key),
            scope,
            deps.iter().map(|d| Key::new(*d)),
            |_r| async { Ok(()) },
        )
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry.register(registration("db", Scope::Permanent, &[]));
        registry.register(registration("svc", Scope::Cached, &["db"]));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&Key::new("db")));
        assert_eq!(
            registry.get(&Key::new("svc")).unwrap().dependencies(),
            &[Key::new("db")]
        );
        assert!(registry.get(&Key::new("missing")).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = Registry::new();
        assert!(registry
            .register(registration("db", Scope::Permanent, &[]))
            .is_none());
        let previous = registry.register(registration("db", Scope::Transient, &[]));

        assert_eq!(previous.unwrap().scope(), &Scope::Permanent);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&Key::new("db")).unwrap().scope(),
            &Scope::Transient
        );
    }

    #[test]
    fn test_get_all_sorted() {
        let mut registry = Registry::new();
        for key in ["c", "a", "b"] {
            registry.register(registration(key, Scope::Permanent, &[]));
        }
        let keys: Vec<String> = registry
            .get_all()
            .iter()
            .map(|r| r.key().name().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(registry.keys(), vec![Key::new("a"), Key::new("b"), Key::new("c")]);
    }

    #[test]
    fn test_keys_in_layer() {
        let mut registry = Registry::new();
        registry.register(registration("config", Scope::eager(), &[]));
        registry.register(registration("db", Scope::eager(), &["config"]));
        registry.register(registration("report", Scope::on_demand(), &[]));
        registry.register(registration("cache", Scope::Cached, &[]));

        assert_eq!(
            registry.keys_in_layer(EAGER_LAYER),
            vec![Key::new("config"), Key::new("db")]
        );
        assert_eq!(registry.keys_in_layer(ON_DEMAND_LAYER), vec![Key::new("report")]);
        assert!(registry.keys_in_layer("missing").is_empty());
    }
}
