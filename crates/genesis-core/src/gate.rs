//! Human-in-the-loop permission gate
//!
//! Sensitive tool calls never execute without an explicit human grant. The
//! registry is an allowlist-style exact-match set: a tool is gated iff its
//! name is present. Ambiguous replies deny: fail closed, never fail open.
//!
//! The gate only renders verdicts; it never executes anything itself.

use std::collections::HashSet;

use crate::session::{GateStatus, SessionState, ToolInvocation, Turn, AUTH_REQUEST_MARK};

/// Replies containing any of these (case-insensitive substring) count as a
/// grant. Everything else is a denial.
const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "ok", "okay", "allow", "proceed", "go ahead", "sure"];

/// Registry of tool names that require human authorization before running.
///
/// Membership is exact string match; this is static configuration, not
/// derived from tool metadata.
#[derive(Debug, Clone)]
pub struct SensitiveActions {
    names: HashSet<String>,
}

impl Default for SensitiveActions {
    fn default() -> Self {
        let mut registry = Self {
            names: HashSet::new(),
        };
        // Anything that mutates the outside world on the user's behalf
        for name in &[
            "send_email",
            "calendar:create",
            "calendar:modify",
            "calendar:delete",
            "calendar",
        ] {
            registry.mark_sensitive(name);
        }
        registry
    }
}

impl SensitiveActions {
    /// Registry with nothing gated
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    /// Require authorization for a tool name
    pub fn mark_sensitive(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// Stop requiring authorization for a tool name
    pub fn allow(&mut self, name: &str) {
        self.names.remove(name);
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// The gate itself: classifies proposed batches and interprets replies
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    registry: SensitiveActions,
}

impl PermissionGate {
    pub fn new(registry: SensitiveActions) -> Self {
        Self { registry }
    }

    /// **propose**: classify a batch of proposed invocations.
    ///
    /// If any call in the batch is sensitive the whole batch is gated
    /// (all-or-nothing): status goes `Pending`, an authorization-request
    /// directive is appended, and the caller must suspend. Otherwise the
    /// batch is granted without user involvement and no turn is appended.
    pub fn propose(&self, state: &mut SessionState, calls: &[ToolInvocation]) -> GateStatus {
        let sensitive = calls.iter().find(|c| self.registry.is_sensitive(&c.name));

        match sensitive {
            Some(call) => {
                let app = app_display_name(&call.name);
                state.push(Turn::directive(format!(
                    "{} Genesis needs permission to use your {} app. \
                     Reply 'OK' to proceed or 'No' to cancel.",
                    AUTH_REQUEST_MARK, app
                )));
                state.gate_status = GateStatus::Pending;
                tracing::info!(tool = %call.name, "sensitive tool proposed, awaiting authorization");
                GateStatus::Pending
            }
            None => {
                state.gate_status = GateStatus::Granted;
                GateStatus::Granted
            }
        }
    }

    /// **resolve**: interpret the human's reply to a pending request.
    ///
    /// Any affirmative token grants; everything else (including ambiguous
    /// text) denies and appends a cancellation directive.
    pub fn resolve(&self, state: &mut SessionState, reply: &str) -> GateStatus {
        let lowered = reply.to_lowercase();
        if AFFIRMATIVE_TOKENS.iter().any(|t| lowered.contains(t)) {
            state.gate_status = GateStatus::Granted;
            tracing::info!("authorization granted");
            GateStatus::Granted
        } else {
            state.push(Turn::directive("Action cancelled by user permission."));
            state.gate_status = GateStatus::Denied;
            tracing::info!("authorization denied");
            GateStatus::Denied
        }
    }
}

/// "calendar:create" -> "Calendar", "send_email" -> "Send Email"
fn app_display_name(tool_name: &str) -> String {
    let base = tool_name.split(':').next().unwrap_or(tool_name);
    base.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolInvocation {
        ToolInvocation::new(name, serde_json::json!({}))
    }

    #[test]
    fn test_non_sensitive_batch_granted_silently() {
        let gate = PermissionGate::default();
        let mut state = SessionState::new();
        let status = gate.propose(&mut state, &[call("research")]);
        assert_eq!(status, GateStatus::Granted);
        assert!(state.turns.is_empty());
    }

    #[test]
    fn test_sensitive_call_goes_pending() {
        let gate = PermissionGate::default();
        let mut state = SessionState::new();
        let status = gate.propose(&mut state, &[call("send_email")]);
        assert_eq!(status, GateStatus::Pending);
        assert!(state.last_turn().unwrap().is_authorization_request());
        assert!(state.last_turn().unwrap().content.contains("Send Email"));
        assert!(state.gate_invariant_holds());
    }

    #[test]
    fn test_mixed_batch_gated_all_or_nothing() {
        let gate = PermissionGate::default();
        let mut state = SessionState::new();
        let status = gate.propose(&mut state, &[call("research"), call("calendar:create")]);
        assert_eq!(status, GateStatus::Pending);
    }

    #[test]
    fn test_affirmative_reply_grants() {
        let gate = PermissionGate::default();
        let mut state = SessionState::new();
        gate.propose(&mut state, &[call("send_email")]);

        for reply in ["yes", "Yes please", "OK", "okay go ahead", "I'll allow it"] {
            let mut s = state.clone();
            assert_eq!(gate.resolve(&mut s, reply), GateStatus::Granted, "{}", reply);
        }
    }

    #[test]
    fn test_ambiguous_reply_fails_closed() {
        let gate = PermissionGate::default();
        let mut state = SessionState::new();
        gate.propose(&mut state, &[call("send_email")]);

        for reply in ["maybe", "later", "no", "absolutely not", ""] {
            let mut s = state.clone();
            assert_eq!(gate.resolve(&mut s, reply), GateStatus::Denied, "{:?}", reply);
            assert!(s.last_turn().unwrap().content.contains("cancelled"));
        }
    }

    #[test]
    fn test_registry_mutation() {
        let mut registry = SensitiveActions::empty();
        assert!(!registry.is_sensitive("send_email"));
        registry.mark_sensitive("send_email");
        assert!(registry.is_sensitive("send_email"));
        registry.allow("send_email");
        assert!(!registry.is_sensitive("send_email"));
    }

    #[test]
    fn test_app_display_name() {
        assert_eq!(app_display_name("calendar:create"), "Calendar");
        assert_eq!(app_display_name("send_email"), "Send Email");
        assert_eq!(app_display_name("research"), "Research");
    }
}
