//! 注册项
//!
//! 一条注册项描述如何生产某个键对应的实例：工厂函数、作用域、声明的依赖、
//! 可读名称以及产出类型名称。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::registry::{Instance, Key, Scope};
use crate::resolver::Resolver;

/// 类型擦除后的工厂函数
///
/// 工厂接收一个解析器句柄，嵌套依赖必须通过该句柄解析，以便解析链正确传递。
pub type BoxedFactory =
    Arc<dyn Fn(Resolver) -> BoxFuture<'static, anyhow::Result<Instance>> + Send + Sync>;

/// 注册项
#[derive(Clone)]
pub struct Registration {
    key: Key,
    scope: Scope,
    dependencies: Vec<Key>,
    name: String,
    type_name: &'static str,
    factory: BoxedFactory,
}

impl Registration {
    /// 由强类型工厂创建注册项
    ///
    /// # 参数
    ///
    /// * `key` - 注册键
    /// * `scope` - 作用域
    /// * `dependencies` - 声明的依赖键，用于构建期校验与分层
    /// * `factory` - 异步工厂，返回 `anyhow::Result<T>`
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_di::{Key, Registration, Scope};
    ///
    /// let registration = Registration::new(
    ///     Key::new("port"),
    ///     Scope::Permanent,
    ///     [],
    ///     |_resolver| async { Ok(8080u16) },
    /// );
    /// assert_eq!(registration.type_name(), "u16");
    /// ```
    pub fn new<T, F, Fut>(
        key: Key,
        scope: Scope,
        dependencies: impl IntoIterator<Item = Key>,
        factory: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let factory: BoxedFactory =
            Arc::new(move |resolver| factory(resolver).map(|r| r.map(Instance::new)).boxed());

        Self::from_boxed(
            key,
            scope,
            dependencies,
            std::any::type_name::<T>(),
            factory,
        )
    }

    /// 由已擦除类型的工厂创建注册项
    pub fn from_boxed(
        key: Key,
        scope: Scope,
        dependencies: impl IntoIterator<Item = Key>,
        type_name: &'static str,
        factory: BoxedFactory,
    ) -> Self {
        let mut unique: Vec<Key> = Vec::new();
        for dependency in dependencies {
            if !unique.contains(&dependency) {
                unique.push(dependency);
            }
        }
        Self {
            name: key.name().to_string(),
            key,
            scope,
            dependencies: unique,
            type_name,
            factory,
        }
    }

    /// 设置可读名称（默认与键名相同）
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 注册键
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// 作用域
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// 声明的依赖
    pub fn dependencies(&self) -> &[Key] {
        &self.dependencies
    }

    /// 可读名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 产出类型名称
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 调用工厂
    pub(crate) fn create(&self, resolver: Resolver) -> BoxFuture<'static, anyhow::Result<Instance>> {
        (self.factory)(resolver)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}
