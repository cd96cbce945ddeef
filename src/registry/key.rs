//! 注册键
//!
//! 注册项的标识。键本身不透明，只保证可哈希、可排序并带有可读名称，
//! 可以由任意字符串构造，也可以由类型名派生。

use std::fmt;
use std::sync::Arc;

/// 注册键
///
/// 内部使用 `Arc<str>`，克隆成本与引用计数相同。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    /// 由名称创建键
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_di::Key;
    ///
    /// let key = Key::new("database");
    /// assert_eq!(key.name(), "database");
    /// ```
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// 由类型派生键，名称为 `std::any::type_name::<T>()`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    /// 可读名称
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
