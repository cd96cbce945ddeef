//! API 模块
//!
//! # 模块概览
//!
//! - `container`: [`Container`] 与 [`ContainerBuilder`]，引擎的主要对外接口
//! - `manifest`: YAML 服务清单，作为注册项来源
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_di::api::{Container, ManifestSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = ManifestSource::from_file("services.yaml").await?;
//!     let container = Container::builder()
//!         .add_source(Arc::new(source))
//!         .build()
//!         .await?;
//!
//!     println!("{}", container.graph_description());
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod manifest;

// 重导出主要类型
pub use container::{Container, ContainerBuilder};
pub use manifest::{ManifestSource, ServiceManifest, ServiceSpec, SERVICE_NAME_PATTERN};
