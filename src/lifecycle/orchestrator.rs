//! 生命周期编排器
//!
//! 按顺序驱动容器启动：收集注册项 -> 校验依赖图 -> 预热 -> 就绪。
//! 每一次状态转换都会广播给订阅者（按顺序，不回放历史状态，
//! 需要在启动前订阅）。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::core::config::DiConfig;
use crate::graph::DependencyAnalyzer;
use crate::lifecycle::state::{LifecyclePhase, LifecycleState};
use crate::registry::{Registry, RegistrationSource};
use crate::resolver::Resolver;
use crate::startup::{StartupCoordinator, StartupMetrics};
use crate::utils::{DiError, Result};

/// 状态广播通道容量
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 启动结果
#[derive(Debug)]
pub struct BootOutcome {
    /// 冻结的注册表
    pub registry: Arc<Registry>,
    /// 就绪的解析器
    pub resolver: Resolver,
    /// 预热统计
    pub startup: Option<StartupMetrics>,
    /// 预热阶段的部分失败
    pub startup_error: Option<DiError>,
}

/// 生命周期编排器
pub struct LifecycleOrchestrator {
    state: Mutex<LifecycleState>,
    events: broadcast::Sender<LifecycleState>,
    coordinator: StartupCoordinator,
}

impl LifecycleOrchestrator {
    /// 创建编排器（初始状态 `Idle`）
    pub fn new(config: &DiConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(LifecycleState::Idle),
            events,
            coordinator: StartupCoordinator::new(&config.startup),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.lock_state().clone()
    }

    /// 当前阶段
    pub fn phase(&self) -> LifecyclePhase {
        self.lock_state().phase()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.events.subscribe()
    }

    /// 启动协调器
    pub fn coordinator(&self) -> &StartupCoordinator {
        &self.coordinator
    }

    /// 最近一次预热的统计
    pub fn startup_report(&self) -> Option<StartupMetrics> {
        self.coordinator.last_metrics()
    }

    /// 转换状态并广播
    ///
    /// # Errors
    ///
    /// 转换不合法时返回 `InvalidStateTransition`，状态保持不变
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut state = self.lock_state();
        let from = state.phase();
        let to = next.phase();

        if !from.can_transition_to(to) {
            return Err(DiError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if from != to {
            info!(from = %from, to = %next, "生命周期状态转换");
        } else {
            debug!(state = %next, "生命周期状态更新");
        }
        *state = next.clone();
        // 没有订阅者时发送失败，可以忽略
        let _ = self.events.send(next);
        Ok(())
    }

    /// 进入失败终态
    pub fn mark_failed(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        error!(reason = %reason, "容器启动失败");
        self.transition(LifecycleState::Failed(reason))
    }

    /// 执行完整启动流程
    ///
    /// # 参数
    ///
    /// * `registry` - 已直接注册的条目
    /// * `sources` - 额外的注册项来源，依次收集
    /// * `parent` - 父容器的解析器
    /// * `config` - 容器配置
    ///
    /// # Errors
    ///
    /// - 来源收集失败、依赖图校验失败时进入 `Failed` 并返回原错误
    /// - 启动过程中被关闭时返回 `ShutdownInProgress`
    ///
    /// 预热阶段的部分失败不是错误，结果中的 `startup_error` 会记录它
    pub async fn boot(
        &self,
        mut registry: Registry,
        sources: &[Arc<dyn RegistrationSource>],
        parent: Option<Resolver>,
        config: &DiConfig,
    ) -> Result<BootOutcome> {
        self.transition(LifecycleState::Configuring)?;

        for source in sources {
            match source.collect(&mut registry).await {
                Ok(count) => debug!(source = source.name(), count, "收集注册项"),
                Err(err) => {
                    self.fail_unless_shut_down(&err)?;
                    return Err(err);
                }
            }
        }

        let analysis = DependencyAnalyzer::new(&registry)
            .with_external(|key| parent.as_ref().map(|p| p.can_resolve(key)).unwrap_or(false))
            .analyze();
        if let Err(err) = analysis.into_result() {
            self.fail_unless_shut_down(&err)?;
            return Err(err);
        }

        let registry = Arc::new(registry);
        let resolver = Resolver::new(Arc::clone(&registry), &config.cache, parent);
        let total = registry.keys_in_layer(self.coordinator.eager_layer()).len();

        if self
            .transition(LifecycleState::WarmingUp { completed: 0, total })
            .is_err()
        {
            resolver.shutdown();
            return Err(DiError::ShutdownInProgress);
        }

        let warmup = self
            .coordinator
            .initialize_eager_layer(&registry, &resolver, |completed, total| {
                // 预热期间被关闭时转换会失败，忽略即可
                let _ = self.transition(LifecycleState::WarmingUp { completed, total });
            })
            .await;

        if self.phase() == LifecyclePhase::Shutdown {
            resolver.shutdown();
            return Err(DiError::ShutdownInProgress);
        }

        let (startup, startup_error) = match warmup {
            Ok(metrics) => (Some(metrics), None),
            Err(err @ DiError::PartialInitializationFailure { .. }) => {
                warn!(error = %err, "预热部分失败，容器仍然就绪");
                (self.coordinator.last_metrics(), Some(err))
            }
            Err(err) => {
                self.fail_unless_shut_down(&err)?;
                resolver.shutdown();
                return Err(err);
            }
        };

        if self
            .transition(LifecycleState::Ready(resolver.clone()))
            .is_err()
        {
            resolver.shutdown();
            return Err(DiError::ShutdownInProgress);
        }

        Ok(BootOutcome {
            registry,
            resolver,
            startup,
            startup_error,
        })
    }

    fn fail_unless_shut_down(&self, err: &DiError) -> Result<()> {
        if self.phase() == LifecyclePhase::Shutdown {
            return Err(DiError::ShutdownInProgress);
        }
        self.mark_failed(err.to_string())
    }

    /// 关闭
    ///
    /// 在 `Configuring`、`WarmingUp`、`Ready` 状态下有效；已关闭时再次调用直接返回。
    /// 拆除启动协调器，就绪状态下同时关闭解析器。
    ///
    /// # Errors
    ///
    /// `Idle` 或 `Failed` 状态下返回 `InvalidStateTransition`
    pub fn shutdown(&self) -> Result<()> {
        let previous = {
            let mut state = self.lock_state();
            let from = state.phase();
            if from == LifecyclePhase::Shutdown {
                return Ok(());
            }
            if !from.can_transition_to(LifecyclePhase::Shutdown) {
                return Err(DiError::InvalidStateTransition {
                    from: from.to_string(),
                    to: LifecyclePhase::Shutdown.to_string(),
                });
            }
            let previous = std::mem::replace(&mut *state, LifecycleState::Shutdown);
            let _ = self.events.send(LifecycleState::Shutdown);
            previous
        };

        self.coordinator.shutdown();
        let cleared = match previous {
            LifecycleState::Ready(ref resolver) => resolver.shutdown(),
            _ => 0,
        };
        info!(from = %previous.phase(), cleared, "容器已关闭");
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("state", &self.phase())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Key, Registration, Scope};
    use async_trait::async_trait;
    use std::time::Duration;

    fn drain(rx: &mut broadcast::Receiver<LifecycleState>) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state.to_string());
        }
        seen
    }

    fn eager(key: &str, deps: &[&str]) -> Registration {
        Registration::new(
            Key::new(key),
            Scope::eager(),
            deps.iter().map(|d| Key::new(*d)),
            |_r| async { Ok(()) },
        )
    }

    fn registry_of(registrations: Vec<Registration>) -> Registry {
        let mut registry = Registry::new();
        for registration in registrations {
            registry.register(registration);
        }
        registry
    }

    struct StaticSource(Vec<Registration>);

    #[async_trait]
    impl RegistrationSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn collect(&self, registry: &mut Registry) -> Result<usize> {
            for registration in &self.0 {
                registry.register(registration.clone());
            }
            Ok(self.0.len())
        }
    }

    #[tokio::test]
    async fn test_boot_sequence() {
        let orchestrator = LifecycleOrchestrator::new(&DiConfig::default());
        let mut rx = orchestrator.subscribe();

        let registry = registry_of(vec![eager("a", &[])]);
        let sources: Vec<Arc<dyn RegistrationSource>> =
            vec![Arc::new(StaticSource(vec![eager("b", &["a"])]))];

        let outcome = orchestrator
            .boot(registry, &sources, None, &DiConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.registry.len(), 2);
        assert!(outcome.startup.unwrap().is_complete());
        assert_eq!(
            drain(&mut rx),
            vec![
                "configuring",
                "warming_up(0/2)",
                "warming_up(1/2)",
                "warming_up(2/2)",
                "ready"
            ]
        );
        assert!(orchestrator.state().is_ready());
    }

    #[tokio::test]
    async fn test_invalid_graph_goes_to_failed() {
        let orchestrator = LifecycleOrchestrator::new(&DiConfig::default());
        let mut rx = orchestrator.subscribe();
        let registry = registry_of(vec![eager("a", &["b"]), eager("b", &["a"])]);

        let err = orchestrator
            .boot(registry, &[], None, &DiConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DiError::CircularDependency(_)));
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "configuring");
        assert!(seen[1].starts_with("failed("));
        assert_eq!(orchestrator.phase(), LifecyclePhase::Failed);

        // 终态不可离开
        assert!(orchestrator.shutdown().is_err());
        assert!(orchestrator.transition(LifecycleState::Configuring).is_err());
    }

    #[tokio::test]
    async fn test_partial_failure_still_ready() {
        let orchestrator = LifecycleOrchestrator::new(&DiConfig::default());
        let failing = Registration::new(Key::new("bad"), Scope::eager(), [], |_r| async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        });
        let registry = registry_of(vec![eager("good", &[]), failing]);

        let outcome = orchestrator
            .boot(registry, &[], None, &DiConfig::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome.startup_error,
            Some(DiError::PartialInitializationFailure { .. })
        ));
        assert_eq!(orchestrator.startup_report().unwrap().failed, vec!["bad".to_string()]);
        assert_eq!(orchestrator.phase(), LifecyclePhase::Ready);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let orchestrator = LifecycleOrchestrator::new(&DiConfig::default());
        let err = orchestrator
            .transition(LifecycleState::WarmingUp { completed: 0, total: 1 })
            .unwrap_err();
        assert_eq!(
            err,
            DiError::InvalidStateTransition {
                from: "idle".to_string(),
                to: "warming_up".to_string()
            }
        );
        assert_eq!(orchestrator.phase(), LifecyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_from_ready_is_idempotent() {
        let orchestrator = LifecycleOrchestrator::new(&DiConfig::default());
        let outcome = orchestrator
            .boot(registry_of(vec![eager("a", &[])]), &[], None, &DiConfig::default())
            .await
            .unwrap();

        orchestrator.shutdown().unwrap();
        orchestrator.shutdown().unwrap();
        assert_eq!(orchestrator.phase(), LifecyclePhase::Shutdown);
        assert!(outcome.resolver.is_shut_down());
        assert!(orchestrator.coordinator().is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_warmup() {
        let orchestrator = Arc::new(LifecycleOrchestrator::new(&DiConfig::default()));
        let slow = Registration::new(Key::new("slow"), Scope::eager(), [], |_r| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let boot = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .boot(registry_of(vec![slow]), &[], None, &DiConfig::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.phase(), LifecyclePhase::WarmingUp);
        orchestrator.shutdown().unwrap();

        let result = boot.await.unwrap();
        assert!(matches!(result, Err(DiError::ShutdownInProgress)));
        assert_eq!(orchestrator.phase(), LifecyclePhase::Shutdown);
    }
}
