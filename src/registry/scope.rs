//! 生命周期作用域
//!
//! 作用域在注册时确定，决定实例的存储位置与复用方式：
//!
//! - `Permanent`: 每个容器至多创建一次，容器存活期间一直持有
//! - `Cached`: 存入容量与存活时间受限的缓存
//! - `Weak`: 只持有弱引用，外部不再持有时下次解析重新创建
//! - `Transient`: 每次解析都重新创建，不存储
//! - `Layer(name)`: 具名初始化层，实例按 `Permanent` 存储；
//!   `"eager"` 层在启动时主动初始化，`"on_demand"` 层在首次解析时创建

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::DiError;

/// 启动时主动初始化的层名称
pub const EAGER_LAYER: &str = "eager";

/// 首次使用时初始化的层名称
pub const ON_DEMAND_LAYER: &str = "on_demand";

/// 实例作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// 容器级单例
    Permanent,
    /// TTL 缓存
    Cached,
    /// 弱引用
    Weak,
    /// 每次新建
    Transient,
    /// 具名初始化层
    Layer(String),
}

/// 作用域对应的存储位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// 永久表
    Permanent,
    /// 弱引用表
    Weak,
    /// TTL 缓存
    Cached,
    /// 不存储
    None,
}

impl Scope {
    /// 启动时主动初始化的层
    pub fn eager() -> Self {
        Scope::Layer(EAGER_LAYER.to_string())
    }

    /// 首次使用时初始化的层
    pub fn on_demand() -> Self {
        Scope::Layer(ON_DEMAND_LAYER.to_string())
    }

    /// 任意具名层
    pub fn layer(name: impl Into<String>) -> Self {
        Scope::Layer(name.into())
    }

    /// 层名称（非层作用域返回 None）
    pub fn layer_name(&self) -> Option<&str> {
        match self {
            Scope::Layer(name) => Some(name),
            _ => None,
        }
    }

    /// 是否属于指定层
    pub fn is_layer(&self, name: &str) -> bool {
        self.layer_name() == Some(name)
    }

    /// 存储位置
    pub fn storage(&self) -> StorageKind {
        match self {
            Scope::Permanent | Scope::Layer(_) => StorageKind::Permanent,
            Scope::Weak => StorageKind::Weak,
            Scope::Cached => StorageKind::Cached,
            Scope::Transient => StorageKind::None,
        }
    }

    /// 并发解析是否共享同一次创建
    pub fn is_single_flight(&self) -> bool {
        self.storage() != StorageKind::None
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Permanent => f.write_str("permanent"),
            Scope::Cached => f.write_str("cached"),
            Scope::Weak => f.write_str("weak"),
            Scope::Transient => f.write_str("transient"),
            Scope::Layer(name) if name == EAGER_LAYER || name == ON_DEMAND_LAYER => {
                f.write_str(name)
            }
            Scope::Layer(name) => write!(f, "layer:{}", name),
        }
    }
}

impl FromStr for Scope {
    type Err = DiError;

    /// 解析作用域字符串
    ///
    /// 接受 `permanent`、`cached`、`weak`、`transient`、`eager`、`on_demand`
    /// 以及 `layer:<name>`。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "permanent" | "singleton" => return Ok(Scope::Permanent),
            "cached" => return Ok(Scope::Cached),
            "weak" => return Ok(Scope::Weak),
            "transient" => return Ok(Scope::Transient),
            EAGER_LAYER => return Ok(Scope::eager()),
            ON_DEMAND_LAYER | "on-demand" | "lazy" => return Ok(Scope::on_demand()),
            _ => {}
        }

        match trimmed.strip_prefix("layer:") {
            Some(name) if !name.trim().is_empty() => Ok(Scope::Layer(name.trim().to_string())),
            _ => Err(DiError::InvalidConfigValue {
                key: "scope".to_string(),
                reason: format!("无法识别的作用域: {}", s),
            }),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = DiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!("permanent".parse::<Scope>().unwrap(), Scope::Permanent);
        assert_eq!("Cached".parse::<Scope>().unwrap(), Scope::Cached);
        assert_eq!("weak".parse::<Scope>().unwrap(), Scope::Weak);
        assert_eq!("transient".parse::<Scope>().unwrap(), Scope::Transient);
        assert_eq!("eager".parse::<Scope>().unwrap(), Scope::eager());
        assert_eq!("on_demand".parse::<Scope>().unwrap(), Scope::on_demand());
        assert_eq!(
            "layer:warm".parse::<Scope>().unwrap(),
            Scope::Layer("warm".to_string())
        );
        assert!("layer:".parse::<Scope>().is_err());
        assert!("forever".parse::<Scope>().is_err());
    }

    #[test]
    fn test_scope_display_roundtrip() {
        for scope in [
            Scope::Permanent,
            Scope::Cached,
            Scope::Weak,
            Scope::Transient,
            Scope::eager(),
            Scope::on_demand(),
            Scope::layer("custom"),
        ] {
            assert_eq!(scope.to_string().parse::<Scope>().unwrap(), scope);
        }
    }

    #[test]
    fn test_scope_storage() {
        assert_eq!(Scope::Permanent.storage(), StorageKind::Permanent);
        assert_eq!(Scope::eager().storage(), StorageKind::Permanent);
        assert_eq!(Scope::Weak.storage(), StorageKind::Weak);
        assert_eq!(Scope::Cached.storage(), StorageKind::Cached);
        assert_eq!(Scope::Transient.storage(), StorageKind::None);
        assert!(!Scope::Transient.is_single_flight());
        assert!(Scope::on_demand().is_single_flight());
    }

    #[test]
    fn test_scope_serde() {
        let yaml = serde_yaml::to_string(&Scope::eager()).unwrap();
        assert_eq!(yaml.trim(), "eager");
        let parsed: Scope = serde_yaml::from_str("layer:warm").unwrap();
        assert!(parsed.is_layer("warm"));
        assert!(serde_yaml::from_str::<Scope>("bogus").is_err());
    }
}
