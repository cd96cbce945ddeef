//! 基本使用示例
//!
//! 本示例展示了依赖解析引擎的基本使用方法，包括：
//!
//! - 注册不同作用域的服务
//! - 构建容器并观察预热进度
//! - 解析实例与子容器回退
//! - 关闭容器
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use chips_di::{Container, DiConfig, Key, LifecycleState, Scope};

/// 数据库连接池（模拟）
#[derive(Debug)]
struct Database {
    url: String,
}

/// 用户服务，依赖数据库
#[derive(Debug)]
struct UserService {
    db: Arc<Database>,
}

/// 主函数
///
/// 演示依赖解析引擎的基本用法。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== 依赖解析引擎基本使用示例 ===\n");

    // -------------------------------------------------------------------------
    // 1. 配置
    // -------------------------------------------------------------------------
    println!("1. 创建配置...");
    let config = DiConfig::builder()
        .max_concurrency(4)
        .cache_max_size(64)
        .cache_ttl(Duration::from_secs(60))
        .build();
    println!("   - 预热并发上限: {}", config.startup.max_concurrency);
    println!("   - 缓存容量: {}", config.cache.max_size);
    println!("   ✅ 配置创建成功\n");

    // -------------------------------------------------------------------------
    // 2. 注册服务
    // -------------------------------------------------------------------------
    println!("2. 注册服务...");
    let mut builder = Container::builder()
        .with_config(config)
        .register("database_url", Scope::Permanent, &[], |_r| async {
            Ok(String::from("postgres://localhost/chips"))
        })
        .register(
            Key::of::<Database>(),
            Scope::eager(),
            &["database_url"],
            |r| async move {
                let url: Arc<String> = r.resolve(&Key::new("database_url")).await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Database {
                    url: url.to_string(),
                })
            },
        )
        .register(
            Key::of::<UserService>(),
            Scope::eager(),
            &[std::any::type_name::<Database>()],
            |r| async move {
                let db = r.resolve_type::<Database>().await?;
                Ok(UserService { db })
            },
        )
        .register("request_id", Scope::Transient, &[], |_r| async {
            Ok(chips_di::generate_id())
        });
    println!("   ✅ 已注册 4 个服务\n");

    // -------------------------------------------------------------------------
    // 3. 构建并预热
    // -------------------------------------------------------------------------
    println!("3. 构建容器...");
    let mut states = builder.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(state) = states.recv().await {
            println!("   状态: {}", state);
            if matches!(state, LifecycleState::Ready(_)) || state.is_terminal() {
                break;
            }
        }
    });

    let container = builder.build().await?;
    let _ = watcher.await;

    if let Some(report) = container.startup_report() {
        println!(
            "   预热 {} 个服务，{} 层，耗时 {} ms",
            report.total,
            report.layer_count,
            report.wall_clock_us / 1000
        );
    }
    println!("   ✅ 容器就绪\n");

    // -------------------------------------------------------------------------
    // 4. 解析实例
    // -------------------------------------------------------------------------
    println!("4. 解析实例...");
    let users = container.resolve_type::<UserService>().await?;
    println!("   UserService 使用数据库: {}", users.db.url);

    let first: Arc<String> = container.resolve("request_id").await?;
    let second: Arc<String> = container.resolve("request_id").await?;
    println!("   transient 每次不同: {} / {}", first, second);
    println!();

    // -------------------------------------------------------------------------
    // 5. 子容器
    // -------------------------------------------------------------------------
    println!("5. 创建子容器...");
    let child = Container::builder()
        .with_parent(&container)
        .register("report", Scope::Transient, &["database_url"], |r| async move {
            let url: Arc<String> = r.resolve(&Key::new("database_url")).await?;
            Ok(format!("report from {}", url))
        })
        .build()
        .await?;
    let report: Arc<String> = child.resolve("report").await?;
    println!("   {}", report);
    println!();

    // -------------------------------------------------------------------------
    // 6. 指标与关闭
    // -------------------------------------------------------------------------
    println!("6. 指标...");
    println!("{}", container.metrics().to_json_pretty()?);

    child.shutdown()?;
    container.shutdown()?;
    println!("\n   ✅ 容器已关闭");

    println!("\n=== 示例结束 ===");
    Ok(())
}
