//! 服务清单
//!
//! 以 YAML 描述一组模拟服务，作为注册项来源供命令行工具和演示使用。
//! 每个服务的工厂先解析声明的依赖，再按 `delay_ms` 等待，最后产出一个
//! 描述自身的字符串；`fail: true` 的服务总是失败。
//!
//! ```yaml
//! services:
//!   - name: config
//!     scope: permanent
//!   - name: database
//!     scope: eager
//!     depends_on: [config]
//!     delay_ms: 120
//!   - name: mailer
//!     scope: eager
//!     fail: true
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::registry::{Key, Registration, RegistrationSource, Registry, Scope};
use crate::resolver::Resolver;
use crate::utils::{DiError, Result};

/// 服务名称规则
pub const SERVICE_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.:\-]*$";

fn default_scope() -> Scope {
    Scope::Permanent
}

/// 单个服务描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// 服务名称（注册键）
    pub name: String,

    /// 作用域
    #[serde(default = "default_scope")]
    pub scope: Scope,

    /// 依赖的服务名称
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// 模拟初始化耗时（毫秒）
    #[serde(default)]
    pub delay_ms: u64,

    /// 是否模拟初始化失败
    #[serde(default)]
    pub fail: bool,
}

/// 服务清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceManifest {
    /// 服务列表
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl ServiceManifest {
    /// 从 YAML 字符串解析并校验
    ///
    /// # Errors
    ///
    /// 格式错误、作用域未知、名称不合法或重复时返回 `InvalidManifest`
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let manifest: Self = serde_yaml::from_str(content)
            .map_err(|e| DiError::InvalidManifest(format!("YAML 解析失败: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// 从文件加载
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DiError::InvalidManifest(format!("读取清单失败: {}: {}", path.display(), e))
        })?;
        let manifest = Self::from_yaml_str(&content)?;
        info!(path = %path.display(), services = manifest.services.len(), "加载服务清单");
        Ok(manifest)
    }

    /// 校验名称
    pub fn validate(&self) -> Result<()> {
        let pattern = Regex::new(SERVICE_NAME_PATTERN)
            .map_err(|e| DiError::Internal(format!("名称规则无效: {}", e)))?;

        let mut seen = HashSet::new();
        for service in &self.services {
            if !pattern.is_match(&service.name) {
                return Err(DiError::InvalidManifest(format!(
                    "服务名称不合法: '{}'",
                    service.name
                )));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(DiError::InvalidManifest(format!(
                    "服务名称重复: '{}'",
                    service.name
                )));
            }
            if let Some(dep) = service.depends_on.iter().find(|d| !pattern.is_match(d)) {
                return Err(DiError::InvalidManifest(format!(
                    "'{}' 的依赖名称不合法: '{}'",
                    service.name, dep
                )));
            }
        }
        Ok(())
    }

    /// 生成注册项
    pub fn registrations(&self) -> Vec<Registration> {
        self.services.iter().map(simulated_registration).collect()
    }
}

fn simulated_registration(service: &ServiceSpec) -> Registration {
    let spec = Arc::new(service.clone());
    let deps: Vec<Key> = service.depends_on.iter().map(Key::new).collect();

    Registration::new(
        Key::new(&service.name),
        service.scope.clone(),
        deps,
        move |resolver: Resolver| {
            let spec = Arc::clone(&spec);
            async move {
                let mut parts = Vec::with_capacity(spec.depends_on.len());
                for dep in &spec.depends_on {
                    let value: Arc<String> = resolver.resolve(&Key::new(dep)).await?;
                    parts.push(value.to_string());
                }
                if spec.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(spec.delay_ms)).await;
                }
                if spec.fail {
                    anyhow::bail!("服务 '{}' 模拟初始化失败", spec.name);
                }
                debug!(service = %spec.name, "模拟服务创建完成");
                Ok::<_, anyhow::Error>(format!("{}({})", spec.name, parts.join(", ")))
            }
        },
    )
}

/// 以服务清单作为注册项来源
#[derive(Debug, Clone)]
pub struct ManifestSource {
    name: String,
    manifest: ServiceManifest,
}

impl ManifestSource {
    /// 创建来源
    pub fn new(name: impl Into<String>, manifest: ServiceManifest) -> Self {
        Self {
            name: name.into(),
            manifest,
        }
    }

    /// 从文件创建，名称取文件路径
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let manifest = ServiceManifest::from_file(path).await?;
        Ok(Self::new(path.display().to_string(), manifest))
    }

    /// 清单内容
    pub fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }
}

#[async_trait]
impl RegistrationSource for ManifestSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, registry: &mut Registry) -> Result<usize> {
        let registrations = self.manifest.registrations();
        let count = registrations.len();
        for registration in registrations {
            registry.register(registration);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::container::Container;
    use std::io::Write;

    const MANIFEST: &str = r#"
services:
  - name: config
  - name: database
    scope: eager
    depends_on: [config]
    delay_ms: 5
  - name: cache
    scope: cached
    depends_on: [database]
  - name: mailer
    scope: eager
    fail: true
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ServiceManifest::from_yaml_str(MANIFEST).unwrap();
        assert_eq!(manifest.services.len(), 4);
        assert_eq!(manifest.services[0].scope, Scope::Permanent);
        assert_eq!(manifest.services[1].scope, Scope::eager());
        assert_eq!(manifest.services[2].scope, Scope::Cached);
        assert!(manifest.services[3].fail);
    }

    #[test]
    fn test_empty_manifest() {
        assert!(ServiceManifest::from_yaml_str("  ").unwrap().services.is_empty());
    }

    #[test]
    fn test_rejects_bad_names() {
        let err = ServiceManifest::from_yaml_str("services:\n  - name: \"bad name\"\n").unwrap_err();
        assert!(matches!(err, DiError::InvalidManifest(_)));

        let err = ServiceManifest::from_yaml_str("services:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(err.to_string().contains("重复"));
    }

    #[test]
    fn test_rejects_unknown_scope() {
        let err = ServiceManifest::from_yaml_str("services:\n  - name: a\n    scope: forever\n")
            .unwrap_err();
        assert!(matches!(err, DiError::InvalidManifest(_)));
    }

    #[tokio::test]
    async fn test_manifest_source_builds_container() {
        let manifest = ServiceManifest::from_yaml_str(MANIFEST).unwrap();
        let container = Container::builder()
            .add_source(Arc::new(ManifestSource::new("inline", manifest)))
            .build()
            .await
            .unwrap();

        let cache: Arc<String> = container.resolve("cache").await.unwrap();
        assert_eq!(cache.as_str(), "cache(database(config()))");

        let report = container.startup_report().unwrap();
        assert_eq!(report.successful, vec!["database".to_string()]);
        assert_eq!(report.failed, vec!["mailer".to_string()]);
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let source = ManifestSource::from_file(file.path()).await.unwrap();
        assert_eq!(source.manifest().services.len(), 4);

        let mut registry = Registry::new();
        assert_eq!(source.collect(&mut registry).await.unwrap(), 4);
        assert!(registry.contains(&Key::new("mailer")));
    }
}
