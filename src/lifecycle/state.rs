//! 生命周期状态机
//!
//! ```text
//! Starting → AwaitingReady → Open → Migrating → Serving → Draining → HandingOver → Closed
//!     └──────────────┴──────────┴──────┴───────────┴─────────┴────────────┴──→ Failed
//! ```
//!
//! 只能向前迁移（允许跳过，例如加入节点跳过 Migrating）；任何非终态都可以进入 Failed。

use std::fmt;

use thiserror::Error;

/// 节点生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Starting,
    AwaitingReady,
    Open,
    Migrating,
    Serving,
    Draining,
    HandingOver,
    Closed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Closed | LifecycleState::Failed)
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == LifecycleState::Failed || next > self
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Starting => "Starting",
            LifecycleState::AwaitingReady => "AwaitingReady",
            LifecycleState::Open => "Open",
            LifecycleState::Migrating => "Migrating",
            LifecycleState::Serving => "Serving",
            LifecycleState::Draining => "Draining",
            LifecycleState::HandingOver => "HandingOver",
            LifecycleState::Closed => "Closed",
            LifecycleState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition {from} -> {to}")]
pub struct TransitionError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// 带历史记录的状态机
#[derive(Debug, Clone)]
pub struct StateMachine {
    owner: String,
    history: Vec<LifecycleState>,
}

impl StateMachine {
    /// `owner` 只用于日志（Pod 名称）
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            history: vec![LifecycleState::Starting],
        }
    }

    pub fn current(&self) -> LifecycleState {
        self.history
            .last()
            .copied()
            .unwrap_or(LifecycleState::Starting)
    }

    /// 经过的所有状态（含初始状态）
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub fn reached(&self, state: LifecycleState) -> bool {
        self.history.contains(&state)
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), TransitionError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(TransitionError {
                from: current,
                to: next,
            });
        }

        log::info!("[{}] lifecycle: {} -> {}", self.owner, current, next);
        self.history.push(next);
        Ok(())
    }

    /// 进入 Failed；已是终态时不变
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            let _ = self.transition(LifecycleState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_full_forward_path() {
        let mut sm = StateMachine::new("db-0");
        for next in [
            AwaitingReady,
            Open,
            Migrating,
            Serving,
            Draining,
            HandingOver,
            Closed,
        ] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.current(), Closed);
        assert_eq!(sm.history().len(), 8);
    }

    #[test]
    fn test_joiner_skips_migrating() {
        let mut sm = StateMachine::new("db-1");
        sm.transition(AwaitingReady).unwrap();
        sm.transition(Open).unwrap();
        sm.transition(Serving).unwrap();
        assert!(!sm.reached(Migrating));
    }

    #[test]
    fn test_backwards_rejected() {
        let mut sm = StateMachine::new("db-0");
        sm.transition(Serving).unwrap();

        let err = sm.transition(Open).unwrap_err();
        assert_eq!(err, TransitionError { from: Serving, to: Open });
        assert_eq!(err.to_string(), "invalid lifecycle transition Serving -> Open");
        assert!(sm.transition(Serving).is_err());
    }

    #[test]
    fn test_fail_from_any_state() {
        for state in [Starting, AwaitingReady, Open, Migrating, Serving, Draining, HandingOver] {
            assert!(state.can_transition_to(Failed), "{}", state);
        }
    }

    #[test]
    fn test_terminal_states() {
        let mut sm = StateMachine::new("db-0");
        sm.transition(Closed).unwrap();
        assert!(sm.transition(Failed).is_err());

        let mut sm = StateMachine::new("db-0");
        sm.fail();
        sm.fail();
        assert_eq!(sm.history(), &[Starting, Failed]);
    }
}
