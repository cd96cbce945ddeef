//! 依赖解析性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 各作用域的解析基准
//! - 并发单飞解析基准
//! - TTL 缓存读写基准
//! - 依赖图分析基准

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use chips_di::graph::DependencyAnalyzer;
use chips_di::store::cache::TtlCache;
use chips_di::{Container, EvictionPolicy, Instance, Key, Registration, Registry, Scope};

// ============================================================================
// 测试辅助
// ============================================================================

/// 构建包含各作用域注册项的容器
fn scoped_container(rt: &tokio::runtime::Runtime) -> Container {
    rt.block_on(async {
        Container::builder()
            .register("permanent", Scope::Permanent, &[], |_r| async { Ok(1u64) })
            .register("cached", Scope::Cached, &[], |_r| async { Ok(2u64) })
            .register("transient", Scope::Transient, &[], |_r| async { Ok(3u64) })
            .register("nested", Scope::Transient, &["permanent"], |r| async move {
                let base: Arc<u64> = r.resolve(&Key::new("permanent")).await?;
                Ok(*base + 1)
            })
            .build()
            .await
            .unwrap()
    })
}

/// 构建一条长度为 `depth` 的依赖链，`node_i` 依赖 `node_{i-1}`
fn chain_registry(depth: usize) -> Registry {
    let mut registry = Registry::new();
    for i in 0..depth {
        let deps: Vec<Key> = if i == 0 {
            Vec::new()
        } else {
            vec![Key::new(format!("node_{}", i - 1))]
        };
        registry.register(Registration::new(
            Key::new(format!("node_{}", i)),
            Scope::Permanent,
            deps,
            |_r| async { Ok(()) },
        ));
    }
    registry
}

// ============================================================================
// 作用域解析基准测试
// ============================================================================

/// 已创建实例的解析与新建实例的解析
fn scope_resolve_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let container = scoped_container(&rt);

    // 预先创建
    rt.block_on(async {
        container.resolve::<u64>("permanent").await.unwrap();
        container.resolve::<u64>("cached").await.unwrap();
    });

    let mut group = c.benchmark_group("scope_resolve");
    for key in ["permanent", "cached", "transient", "nested"] {
        group.bench_with_input(BenchmarkId::from_parameter(key), &key, |b, &key| {
            b.to_async(&rt)
                .iter(|| async { container.resolve::<u64>(black_box(key)).await.unwrap() });
        });
    }
    group.finish();
}

// ============================================================================
// 并发解析基准测试
// ============================================================================

/// 同一个键的并发首次解析，每轮重建容器
fn single_flight_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("single_flight");

    for concurrency in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| async move {
                    let container = Container::builder()
                        .register("shared", Scope::Permanent, &[], |_r| async {
                            tokio::task::yield_now().await;
                            Ok(vec![0u8; 64])
                        })
                        .build()
                        .await
                        .unwrap();
                    join_all((0..concurrency).map(|_| container.resolve::<Vec<u8>>("shared")))
                        .await
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// 缓存基准测试
// ============================================================================

/// TTL 缓存在不同淘汰策略下的写入与命中
fn cache_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttl_cache");

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Fifo] {
        let cache = TtlCache::new(1000, Duration::from_secs(300), policy);
        let keys: Vec<Key> = (0..2000).map(|i| Key::new(format!("k{}", i))).collect();
        let value = Instance::new(42u64);

        group.bench_function(BenchmarkId::new("insert_with_eviction", policy), |b| {
            let mut i = 0;
            b.iter(|| {
                cache.insert(keys[i % keys.len()].clone(), value.clone());
                i += 1;
            });
        });

        for key in keys.iter().take(1000) {
            cache.insert(key.clone(), value.clone());
        }
        group.bench_function(BenchmarkId::new("get", policy), |b| {
            let mut i = 0;
            b.iter(|| {
                let hit = cache.get(black_box(&keys[i % 1000]));
                i += 1;
                hit
            });
        });
    }
    group.finish();
}

// ============================================================================
// 依赖图分析基准测试
// ============================================================================

/// 不同深度依赖链的分析耗时
fn graph_analysis_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_analysis");

    for depth in [10usize, 100, 1000].iter() {
        let registry = chain_registry(*depth);
        group.throughput(Throughput::Elements(*depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| DependencyAnalyzer::new(black_box(&registry)).analyze());
        });
    }
    group.finish();
}

criterion_group!(
    name = resolve_benches;
    config = Criterion::default().sample_size(100);
    targets = scope_resolve_benchmark
);

criterion_group!(
    name = concurrent_benches;
    config = Criterion::default().sample_size(50);
    targets = single_flight_benchmark
);

criterion_group!(
    name = store_benches;
    config = Criterion::default().sample_size(100);
    targets = cache_benchmark, graph_analysis_benchmark
);

criterion_main!(resolve_benches, concurrent_benches, store_benches);
