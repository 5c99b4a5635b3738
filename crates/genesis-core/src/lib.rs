//! Genesis Core - Agent Orchestration Kernel
//!
//! A turn-based state machine that plans with a language model, gates
//! sensitive tool calls behind human authorization, suspends and resumes
//! across external inputs, and loops between planning and tool execution
//! until a terminal text response is produced.

mod gate;
mod kernel;
mod llm;
mod planner;
mod session;
mod store;
mod tools;

pub use gate::{PermissionGate, SensitiveActions};
pub use kernel::{Kernel, KernelEvent};
pub use llm::{ChatModel, ConfigError, ModelConfig, ModelOutput, OpenRouterModel};
pub use planner::Planner;
pub use session::{GateStatus, Role, SessionState, ToolInvocation, Turn, AUTH_REQUEST_MARK};
pub use store::{ContextStore, SessionStore, NO_PRIOR_MEMORY};
pub use tools::{builtin_registry, Tool, ToolRegistry};
