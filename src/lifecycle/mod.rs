//! 节点生命周期
//!
//! - 状态机（只向前迁移）
//! - 编排器（启动、服务、有序关闭）
//! - 信号驱动的取消上下文

pub mod orchestrator;
pub mod signals;
pub mod state;

pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use signals::RunContext;
pub use state::{LifecycleState, StateMachine, TransitionError};
