//! 生命周期状态

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resolver::Resolver;

/// 生命周期状态
///
/// ```text
/// Idle -> Configuring -> WarmingUp{completed,total} -> Ready(resolver)
///              |                  |                        |
///              +-----> Failed <---+                        v
///              +------------------+---------------> Shutdown
/// ```
#[derive(Debug, Clone)]
pub enum LifecycleState {
    /// 尚未开始
    Idle,
    /// 正在收集注册项并校验依赖图
    Configuring,
    /// 正在预热
    WarmingUp {
        /// 已完成的键
        completed: usize,
        /// 预热键总数
        total: usize,
    },
    /// 就绪，携带可用的解析器
    Ready(Resolver),
    /// 失败（终态）
    Failed(String),
    /// 已关闭（终态）
    Shutdown,
}

/// 不携带数据的状态阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// 尚未开始
    Idle,
    /// 配置中
    Configuring,
    /// 预热中
    WarmingUp,
    /// 就绪
    Ready,
    /// 失败
    Failed,
    /// 已关闭
    Shutdown,
}

impl LifecyclePhase {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Failed | LifecyclePhase::Shutdown)
    }

    /// 是否允许转换到 `next`
    pub fn can_transition_to(&self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Idle, Configuring)
                | (Configuring, WarmingUp)
                | (Configuring, Failed)
                | (Configuring, Shutdown)
                | (WarmingUp, WarmingUp)
                | (WarmingUp, Ready)
                | (WarmingUp, Failed)
                | (WarmingUp, Shutdown)
                | (Ready, Shutdown)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Idle => "idle",
            LifecyclePhase::Configuring => "configuring",
            LifecyclePhase::WarmingUp => "warming_up",
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::Failed => "failed",
            LifecyclePhase::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

impl LifecycleState {
    /// 状态阶段
    pub fn phase(&self) -> LifecyclePhase {
        match self {
            LifecycleState::Idle => LifecyclePhase::Idle,
            LifecycleState::Configuring => LifecyclePhase::Configuring,
            LifecycleState::WarmingUp { .. } => LifecyclePhase::WarmingUp,
            LifecycleState::Ready(_) => LifecyclePhase::Ready,
            LifecycleState::Failed(_) => LifecyclePhase::Failed,
            LifecycleState::Shutdown => LifecyclePhase::Shutdown,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// 是否就绪
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready(_))
    }

    /// 就绪状态下的解析器
    pub fn resolver(&self) -> Option<&Resolver> {
        match self {
            LifecycleState::Ready(resolver) => Some(resolver),
            _ => None,
        }
    }

    /// 预热进度（0.0 - 1.0）
    pub fn progress(&self) -> Option<f64> {
        match self {
            LifecycleState::WarmingUp { total: 0, .. } => Some(1.0),
            LifecycleState::WarmingUp { completed, total } => {
                Some(*completed as f64 / *total as f64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::WarmingUp { completed, total } => {
                write!(f, "warming_up({}/{})", completed, total)
            }
            LifecycleState::Failed(reason) => write!(f, "failed({})", reason),
            other => write!(f, "{}", other.phase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use LifecyclePhase::*;
        assert!(Idle.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Failed));
        assert!(WarmingUp.can_transition_to(WarmingUp));
        assert!(Ready.can_transition_to(Shutdown));

        assert!(!Idle.can_transition_to(Ready));
        assert!(!Configuring.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Configuring));
        assert!(!Failed.can_transition_to(Shutdown));
        assert!(!Shutdown.can_transition_to(Idle));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(LifecyclePhase::Failed.is_terminal());
        assert!(LifecyclePhase::Shutdown.is_terminal());
        assert!(!LifecyclePhase::Ready.is_terminal());
    }

    #[test]
    fn test_display_and_progress() {
        let state = LifecycleState::WarmingUp {
            completed: 1,
            total: 4,
        };
        assert_eq!(state.to_string(), "warming_up(1/4)");
        assert_eq!(state.progress(), Some(0.25));
        assert_eq!(LifecycleState::Idle.to_string(), "idle");
        assert_eq!(
            LifecycleState::Failed("boom".to_string()).to_string(),
            "failed(boom)"
        );
        assert_eq!(
            LifecycleState::WarmingUp { completed: 0, total: 0 }.progress(),
            Some(1.0)
        );
    }

    #[test]
    fn test_phase_serde() {
        let json = serde_json::to_string(&LifecyclePhase::WarmingUp).unwrap();
        assert_eq!(json, "\"warming_up\"");
    }
}
