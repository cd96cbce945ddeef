//! 类型擦除的实例
//!
//! 实例以 `Arc<dyn Any + Send + Sync>` 保存，同时记录产出类型的名称，
//! 读取时按期望类型向下转换，失败返回 `TypeMismatch`。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::registry::Key;
use crate::utils::{DiError, Result};

/// 类型擦除的实例
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Instance {
    /// 包装一个值
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// 包装一个已有的 `Arc`
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// 产出类型名称
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 按期望类型取出实例
    ///
    /// # Errors
    ///
    /// 实际类型与 `T` 不一致时返回 `TypeMismatch`
    pub fn downcast<T: Send + Sync + 'static>(&self, key: &Key) -> Result<Arc<T>> {
        Arc::clone(&self.value)
            .downcast::<T>()
            .map_err(|_| DiError::TypeMismatch {
                key: key.name().to_string(),
                expected: std::any::type_name::<T>().to_string(),
                actual: self.type_name.to_string(),
            })
    }

    /// 是否指向同一个对象
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// 创建弱引用
    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            value: Arc::downgrade(&self.value),
            type_name: self.type_name,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .field("strong_count", &Arc::strong_count(&self.value))
            .finish()
    }
}

/// 实例的弱引用
#[derive(Clone)]
pub struct WeakInstance {
    value: Weak<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl WeakInstance {
    /// 尝试升级为强引用，目标已释放时返回 None
    pub fn upgrade(&self) -> Option<Instance> {
        self.value.upgrade().map(|value| Instance {
            value,
            type_name: self.type_name,
        })
    }

    /// 目标是否仍然存活
    pub fn is_alive(&self) -> bool {
        self.value.strong_count() > 0
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInstance")
            .field("type_name", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Config {
        port: u16,
    }

    #[test]
    fn test_downcast_success() {
        let instance = Instance::new(Config { port: 8080 });
        let config = instance.downcast::<Config>(&Key::new("config")).unwrap();
        assert_eq!(config.port, 8080);
        assert!(instance.type_name().ends_with("Config"));
    }

    #[test]
    fn test_downcast_mismatch() {
        let instance = Instance::new(42u32);
        let err = instance.downcast::<String>(&Key::new("answer")).unwrap_err();
        match err {
            DiError::TypeMismatch {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "answer");
                assert!(expected.contains("String"));
                assert_eq!(actual, "u32");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_weak_instance() {
        let instance = Instance::new(Config { port: 1 });
        let weak = instance.downgrade();
        assert!(weak.is_alive());
        assert!(weak.upgrade().unwrap().ptr_eq(&instance));

        drop(instance);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
