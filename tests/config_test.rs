//! 配置系统集成测试
//!
//! 测试配置文件加载、校验、合并以及配置对容器行为的影响

use std::sync::Arc;
use std::time::Duration;

use chips_di::{
    Container, DiConfig, DiError, EvictionPolicy, Key, Scope,
};
use tempfile::TempDir;

/// 测试 YAML 配置文件的完整加载流程
#[tokio::test]
async fn test_load_yaml_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("di.yaml");
    tokio::fs::write(
        &path,
        r#"
cache:
  max_size: 16
  ttl_secs: 30
  eviction_policy: fifo
startup:
  max_concurrency: 3
  eager_layer: boot
memory_pressure:
  enabled: true
  memory_threshold_mb: 256
  eviction_fraction: 0.5
logging:
  level: debug
  json_format: true
dev_mode: true
"#,
    )
    .await
    .unwrap();

    let config = DiConfig::from_file(&path).await.unwrap();
    assert_eq!(config.cache.max_size, 16);
    assert_eq!(config.cache.ttl_secs, 30);
    assert_eq!(config.cache.eviction_policy, EvictionPolicy::Fifo);
    assert_eq!(config.startup.max_concurrency, 3);
    assert_eq!(config.startup.eager_layer, "boot");
    assert!(config.memory_pressure.enabled);
    assert_eq!(config.memory_pressure.memory_threshold_mb, 256);
    // 未写出的字段使用默认值
    assert_eq!(config.memory_pressure.check_interval_secs, 30);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert!(config.dev_mode);
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
}

/// 测试 JSON 配置文件按扩展名解析
#[tokio::test]
async fn test_load_json_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("di.json");
    tokio::fs::write(&path, r#"{ "cache": { "max_size": 4 } }"#)
        .await
        .unwrap();

    let config = DiConfig::from_file(&path).await.unwrap();
    assert_eq!(config.cache.max_size, 4);
    assert_eq!(config.cache.ttl_secs, 300);
}

/// 测试空文件得到默认配置
#[tokio::test]
async fn test_empty_file_is_default() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.yaml");
    tokio::fs::write(&path, "").await.unwrap();

    let config = DiConfig::from_file(&path).await.unwrap();
    assert_eq!(config.cache, DiConfig::default().cache);
}

/// 测试加载失败的错误分类
#[tokio::test]
async fn test_load_errors() {
    let temp_dir = TempDir::new().unwrap();

    let missing = DiConfig::from_file(temp_dir.path().join("nope.yaml")).await;
    assert!(matches!(missing, Err(DiError::ConfigLoadFailed(_))));

    let broken = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&broken, "cache: [not, a, map").await.unwrap();
    assert!(matches!(
        DiConfig::from_file(&broken).await,
        Err(DiError::ConfigLoadFailed(_))
    ));

    let invalid = temp_dir.path().join("invalid.yaml");
    tokio::fs::write(&invalid, "memory_pressure:\n  eviction_fraction: 1.5\n")
        .await
        .unwrap();
    match DiConfig::from_file(&invalid).await {
        Err(DiError::InvalidConfigValue { key, .. }) => {
            assert_eq!(key, "memory_pressure.eviction_fraction");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// 测试配置合并只覆盖非默认字段
#[tokio::test]
async fn test_merge_overrides_non_default_fields() {
    let mut base = DiConfig::builder()
        .cache_max_size(50)
        .log_level("warn")
        .build();

    let overlay = DiConfig::from_yaml_str("cache:\n  ttl_secs: 10\ndev_mode: true\n").unwrap();
    base.merge(overlay);

    assert_eq!(base.cache.max_size, 50);
    assert_eq!(base.cache.ttl_secs, 10);
    assert_eq!(base.logging.level, "warn");
    assert!(base.dev_mode);
}

/// 测试自定义预热层名称决定哪些注册项在启动时初始化
#[tokio::test]
async fn test_custom_eager_layer_drives_warmup() {
    let config = DiConfig::builder().eager_layer("boot").max_concurrency(2).build();

    let container = Container::builder()
        .with_config(config)
        .register("booted", Scope::layer("boot"), &[], |_r| async { Ok(1u8) })
        .register("eager_default", Scope::eager(), &[], |_r| async { Ok(2u8) })
        .build()
        .await
        .unwrap();

    let report = container.startup_report().unwrap();
    assert_eq!(report.successful, vec!["booted".to_string()]);
    assert_eq!(report.worker_limit, 2);
    assert!(container
        .resolver()
        .store()
        .permanent()
        .contains(&Key::new("booted")));
    assert!(!container
        .resolver()
        .store()
        .permanent()
        .contains(&Key::new("eager_default")));
}

/// 测试缓存配置作用于 cached 作用域
#[tokio::test(start_paused = true)]
async fn test_cache_config_applies_to_cached_scope() {
    let config = DiConfig::builder()
        .cache_max_size(2)
        .cache_ttl(Duration::from_secs(10))
        .eviction_policy(EvictionPolicy::Fifo)
        .build();

    let mut builder = Container::builder().with_config(config);
    for name in ["a", "b", "c"] {
        builder = builder.register(name, Scope::Cached, &[], move |_r| async move {
            Ok(name.to_string())
        });
    }
    let container = builder.build().await.unwrap();

    let first_a: Arc<String> = container.resolve("a").await.unwrap();
    container.resolve::<String>("b").await.unwrap();
    // FIFO 下访问 a 不会延长它的位置
    container.resolve::<String>("a").await.unwrap();
    container.resolve::<String>("c").await.unwrap();

    let stats = container.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.evictions, 1);

    let again_a: Arc<String> = container.resolve("a").await.unwrap();
    assert!(!Arc::ptr_eq(&first_a, &again_a));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(container.resolver().store().cache().get(&Key::new("c")).is_none());
}
