//! Session data model: turns, tool invocations, gate status
//!
//! A session is the full ordered history of one conversation thread plus the
//! permission-gate status. Turns are append-only; nothing here mutates a turn
//! after it has been created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker prefixing authorization-request directives. Lets the invariant
/// check tell an unresolved request apart from other directives (e.g. a
/// cancellation notice) without extra state.
pub const AUTH_REQUEST_MARK: &str = "🔒";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// External user input
    User,
    /// Model output (text or proposed tool calls)
    Assistant,
    /// Kernel-injected directive (system prompt, authorization request,
    /// cancellation notice)
    SystemDirective,
    /// Output of an executed tool
    ToolResult,
}

/// A tool call proposed by the model: name plus structured arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// One immutable message in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Proposed tool calls; only ever non-empty on assistant turns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_calls: vec![],
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn directive(content: impl Into<String>) -> Self {
        Self::new(Role::SystemDirective, content)
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::new(Role::ToolResult, content)
    }

    /// Attach proposed tool calls (assistant turns only)
    pub fn with_tool_calls(mut self, calls: Vec<ToolInvocation>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Is this turn an authorization request awaiting a human reply?
    pub fn is_authorization_request(&self) -> bool {
        self.role == Role::SystemDirective && self.content.starts_with(AUTH_REQUEST_MARK)
    }
}

/// Permission-gate status for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// No outstanding authorization request
    #[default]
    None,
    /// Awaiting a human yes/no reply
    Pending,
    /// One-shot grant, consumed by the transition that reads it
    Granted,
    /// Request refused; terminal for that request
    Denied,
}

/// Full state of one conversation thread: turn history plus gate status.
///
/// Owned exclusively by the kernel while a call is in flight; retrieved from
/// and persisted to a [`SessionStore`](crate::store::SessionStore) around
/// each call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub turns: Vec<Turn>,
    pub gate_status: GateStatus,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. The only way the history grows.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Most recent non-directive turn; what the planner treats as the live
    /// user request when retrieving context.
    pub fn last_request_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role != Role::SystemDirective)
            .map(|t| t.content.as_str())
    }

    /// Gate invariant: `Pending` iff the last turn is an unresolved
    /// authorization request (a system directive with no reply after it).
    pub fn gate_invariant_holds(&self) -> bool {
        let unresolved = self
            .last_turn()
            .map(Turn::is_authorization_request)
            .unwrap_or(false);
        (self.gate_status == GateStatus::Pending) == unresolved
    }
}
