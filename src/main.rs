//! chips-di 命令行入口
//!
//! 对 YAML 服务清单做依赖图校验、分层展示、DOT 导出与模拟预热。
//!
//! # 命令概览
//!
//! - `validate` - 校验服务清单的依赖图
//! - `layers` - 显示拓扑分层
//! - `graph` - 输出 Graphviz DOT
//! - `warmup` - 以模拟工厂构建容器并预热 `eager` 层
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 校验清单
//! chips-di validate services.yaml
//!
//! # 使用自定义配置预热，并输出 JSON 报告
//! chips-di -c di.yaml warmup services.yaml --json
//!
//! # 生成依赖图
//! chips-di graph services.yaml | dot -Tsvg > graph.svg
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use chips_di::api::{ManifestSource, ServiceManifest};
use chips_di::graph::{DependencyAnalyzer, GraphAnalysis};
use chips_di::lifecycle::LifecycleState;
use chips_di::registry::Registry;
use chips_di::utils::logger::{LogGuard, Logger, LoggerConfig};
use chips_di::{Container, DiConfig, DiError};

/// chips-di - 依赖解析与生命周期引擎
#[derive(Parser)]
#[command(name = "chips-di")]
#[command(version, about = "薯片生态的依赖解析与生命周期引擎", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "di.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（显示线程与源码位置）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 校验服务清单的依赖图
    ///
    /// 报告缺失依赖（全部列出）或循环依赖路径。
    Validate {
        /// 服务清单路径
        manifest: PathBuf,
    },

    /// 显示拓扑分层
    Layers {
        /// 服务清单路径
        manifest: PathBuf,
    },

    /// 输出 Graphviz DOT 格式的依赖图
    Graph {
        /// 服务清单路径
        manifest: PathBuf,
    },

    /// 构建容器并预热
    ///
    /// 清单中的服务以模拟工厂运行，按 `delay_ms` 等待，`fail: true` 的服务失败。
    Warmup {
        /// 服务清单路径
        manifest: PathBuf,

        /// 以 JSON 输出预热与解析报告
        #[arg(long)]
        json: bool,
    },

    /// 验证配置文件
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看版本信息
    Version,
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path, dev_mode: bool) -> Result<DiConfig, DiError> {
    let mut config = if path.exists() {
        DiConfig::from_file(path).await?
    } else {
        DiConfig::default()
    };
    if dev_mode {
        config.dev_mode = true;
    }
    Ok(config)
}

/// 按配置初始化日志
fn init_logging(config: &DiConfig, level_override: Option<&str>) -> LogGuard {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = level_override {
        logger_config.level = level.to_string();
    }
    if config.dev_mode {
        logger_config.show_thread_ids = true;
        logger_config.show_file_line = true;
    }
    Logger::try_init(logger_config)
}

async fn load_registry(path: &Path) -> Result<Registry, DiError> {
    let manifest = ServiceManifest::from_file(path).await?;
    let mut registry = Registry::new();
    for registration in manifest.registrations() {
        registry.register(registration);
    }
    Ok(registry)
}

/// 校验服务清单
async fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(path).await?;

    println!("校验服务清单: {}", path.display());
    println!("────────────────────────────────────────");
    let analysis = DependencyAnalyzer::new(&registry).analyze();
    match analysis {
        GraphAnalysis::Valid(layers) => {
            println!("✅ 依赖图有效");
            println!("    服务数: {}", registry.len());
            println!("    层数:   {}", layers.len());
            Ok(())
        }
        GraphAnalysis::Missing(names) => {
            println!("❌ 依赖缺失:");
            for name in &names {
                println!("    - {}", name);
            }
            Err(Box::new(DiError::MissingDependencies(names)))
        }
        GraphAnalysis::Circular(path) => {
            let path = path.join(" -> ");
            println!("❌ 循环依赖: {}", path);
            Err(Box::new(DiError::CircularDependency(path)))
        }
    }
}

/// 显示拓扑分层
async fn show_layers(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(path).await?;
    let layers = DependencyAnalyzer::new(&registry).analyze().into_result()?;

    println!();
    println!("拓扑分层");
    println!("═══════════════════════════════════════");
    for (index, layer) in layers.iter().enumerate() {
        let names: Vec<String> = layer
            .iter()
            .map(|key| match registry.get(key) {
                Some(r) => format!("{} [{}]", key, r.scope()),
                None => key.to_string(),
            })
            .collect();
        println!("  第 {} 层: {}", index, names.join(", "));
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 输出 DOT
async fn show_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(path).await?;
    println!("{}", DependencyAnalyzer::new(&registry).describe());
    Ok(())
}

/// 构建容器并预热
async fn warmup(
    config: DiConfig,
    path: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = ManifestSource::from_file(path).await?;

    let mut builder = Container::builder()
        .with_config(config)
        .add_source(Arc::new(source));
    let mut states = builder.subscribe();

    let progress = tokio::spawn(async move {
        while let Ok(state) = states.recv().await {
            if let LifecycleState::WarmingUp { completed, total } = state {
                if total > 0 {
                    eprintln!("  预热进度: {}/{}", completed, total);
                }
            }
            if state.is_terminal() || state.is_ready() {
                break;
            }
        }
    });

    let container = builder.build().await?;
    let _ = progress.await;

    let report = container.startup_report();
    if json {
        let output = serde_json::json!({
            "container_id": container.id(),
            "state": container.state().to_string(),
            "startup": report,
            "metrics": container.metrics(),
            "cache": container.cache_stats(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(report) = report {
        println!();
        println!("预热报告 (run {})", report.run_id);
        println!("════════════════════════════════════════");
        println!("  总数:       {}", report.total);
        println!("  层数:       {}", report.layer_count);
        println!("  并发上限:   {}", report.worker_limit);
        println!("  成功:       {:?}", report.successful);
        println!("  失败:       {:?}", report.failed);
        println!("  墙钟耗时:   {} ms", report.wall_clock_us / 1000);
        println!("  并行效率:   {:.2}", report.parallelization_efficiency);
        println!("════════════════════════════════════════");
        if let Some(err) = container.startup_error() {
            println!("⚠️  {}", err);
        }
        println!();
    }

    container.shutdown()?;
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        match DiConfig::from_file(path).await {
            Ok(config) => {
                println!("✅ 配置文件有效！");
                config
            }
            Err(e) => {
                println!("❌ 配置文件无效: {}", e);
                return Err(Box::new(e));
            }
        }
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        DiConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [缓存]");
    println!("    容量:           {}", config.cache.max_size);
    println!("    TTL:            {} 秒", config.cache.ttl_secs);
    println!("    淘汰策略:       {}", config.cache.eviction_policy);
    println!();
    println!("  [预热]");
    println!("    最大并发:       {}", config.startup.max_concurrency);
    println!("    预热层:         {}", config.startup.eager_layer);
    println!();
    println!("  [内存压力]");
    println!("    启用:           {}", if config.memory_pressure.enabled { "是" } else { "否" });
    println!("    阈值:           {} MB", config.memory_pressure.memory_threshold_mb);
    println!("    淘汰比例:       {}", config.memory_pressure.eviction_fraction);
    println!();
    println!("  [日志]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("chips-di - 依赖解析与生命周期引擎");
    println!("═══════════════════════════════════════");
    println!("  版本:     {}", chips_di::VERSION);
    println!("  目标平台: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Version 和 CheckConfig 不需要日志
    let config = match cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::CheckConfig { ref config } => {
            let path = config.clone().unwrap_or_else(|| cli.config.clone());
            return check_config(&path).await;
        }
        _ => load_config(&cli.config, cli.dev).await?,
    };

    let _guard = init_logging(&config, cli.log_level.as_deref());
    info!(config = %cli.config.display(), "chips-di 启动");

    match cli.command {
        Commands::Validate { manifest } => validate(&manifest).await?,
        Commands::Layers { manifest } => show_layers(&manifest).await?,
        Commands::Graph { manifest } => show_graph(&manifest).await?,
        Commands::Warmup { manifest, json } => warmup(config, &manifest, json).await?,
        Commands::Version | Commands::CheckConfig { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_validate_reports_graph_state() {
        let valid = manifest_file("services:\n  - name: config\n  - name: db\n    depends_on: [config]\n");
        assert!(validate(valid.path()).await.is_ok());

        let missing = manifest_file("services:\n  - name: db\n    depends_on: [config]\n");
        assert!(validate(missing.path()).await.is_err());

        let circular = manifest_file(
            "services:\n  - name: a\n    depends_on: [b]\n  - name: b\n    depends_on: [a]\n",
        );
        let err = validate(circular.path()).await.unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
