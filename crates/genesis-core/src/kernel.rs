//! The orchestration kernel
//!
//! One external input drives one pass through the planner ↔ tool loop:
//!
//! ```text
//! planner ──(final text)──────────────► halt
//!    │
//!    └─(tool calls)─► permission gate ──(granted)─► tools ─► planner
//!                          │    │
//!                          │    └─(denied)─► halt
//!                          └─(pending)─► suspend, await next input
//! ```
//!
//! Session state is retrieved by key at entry and persisted at every exit
//! point, so a suspended session resumes cleanly on the next call. Calls on
//! the same session id serialize; distinct ids are independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::gate::PermissionGate;
use crate::llm::{ChatModel, ModelOutput};
use crate::planner::Planner;
use crate::session::{GateStatus, SessionState, ToolInvocation, Turn};
use crate::store::{ContextStore, SessionStore};
use crate::tools::ToolRegistry;

/// Maximum planner ↔ tool round trips per external call. Exceeding it is
/// fatal for that call: the kernel halts with a diagnostic turn.
const MAX_PLAN_ROUNDS: usize = 10;

/// What the kernel says when the ceiling is hit
const CEILING_RESPONSE: &str =
    "Unable to complete the request: too many planning steps. Try a simpler goal.";

/// Progress events emitted during a call, for incremental rendering
#[derive(Debug, Clone)]
pub enum KernelEvent {
    /// Waiting on the model
    Thinking,
    /// Suspended awaiting human authorization
    PermissionRequest { message: String },
    /// A tool is being executed
    ToolCall { name: String, preview: String },
    /// Tool execution completed
    ToolResult { name: String, preview: String },
    /// Final text response for this call
    Response(String),
}

/// Long-lived orchestrator. Constructed once at process start with its
/// collaborators injected; drives any number of sessions concurrently.
pub struct Kernel {
    planner: Planner,
    tools: ToolRegistry,
    gate: PermissionGate,
    context: Arc<dyn ContextStore>,
    sessions: Arc<dyn SessionStore>,
    /// Per-session guards enforcing one in-flight call per session id
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Kernel {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        gate: PermissionGate,
        context: Arc<dyn ContextStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            planner: Planner::new(model),
            tools,
            gate,
            context,
            sessions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one external input for a session. Returns the turns produced
    /// by this call (everything appended after the caller's own input),
    /// always at least one.
    pub async fn advance(&self, session_id: &str, user_text: &str) -> Vec<Turn> {
        self.advance_with_events(session_id, user_text, |_| {}).await
    }

    /// [`advance`](Self::advance) with a progress callback, so a frontend
    /// can render tool activity and permission requests as they happen.
    pub async fn advance_with_events<F>(
        &self,
        session_id: &str,
        user_text: &str,
        mut on_event: F,
    ) -> Vec<Turn>
    where
        F: FnMut(KernelEvent),
    {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().await;

        let mut state = self.sessions.get(session_id).unwrap_or_default();

        // Resolve a pending authorization before anything else; otherwise
        // this is an ordinary user turn.
        let resuming = state.gate_status == GateStatus::Pending;
        state.push(Turn::user(user_text));
        let produced_from = state.turns.len();

        if resuming {
            match self.gate.resolve(&mut state, user_text) {
                GateStatus::Denied => {
                    // Terminal for the request; next input starts fresh
                    state.gate_status = GateStatus::None;
                    if let Some(turn) = state.last_turn() {
                        on_event(KernelEvent::Response(turn.content.clone()));
                    }
                    self.persist(session_id, &state);
                    return state.turns.split_off(produced_from);
                }
                _ => {
                    // Granted: run the batch that was held at the gate
                    let held = pending_invocations(&state);
                    state.gate_status = GateStatus::None;
                    self.execute_batch(&mut state, &held, &mut on_event).await;
                }
            }
        }

        for _round in 0..MAX_PLAN_ROUNDS {
            on_event(KernelEvent::Thinking);
            let output = self
                .planner
                .plan(&state, self.context.as_ref(), &self.tools.schemas())
                .await;

            match output {
                ModelOutput::Final(text) => {
                    state.push(Turn::assistant(text.clone()));
                    self.log_interaction(&text);
                    self.persist(session_id, &state);
                    on_event(KernelEvent::Response(text));
                    return state.turns.split_off(produced_from);
                }
                ModelOutput::ToolCalls(calls) => {
                    state.push(Turn::assistant("").with_tool_calls(calls.clone()));

                    match self.gate.propose(&mut state, &calls) {
                        GateStatus::Pending => {
                            // Suspend: hand control back, durably pending
                            self.persist(session_id, &state);
                            if let Some(turn) = state.last_turn() {
                                on_event(KernelEvent::PermissionRequest {
                                    message: turn.content.clone(),
                                });
                            }
                            return state.turns.split_off(produced_from);
                        }
                        _ => {
                            // Granted without user involvement; consume it
                            state.gate_status = GateStatus::None;
                            self.execute_batch(&mut state, &calls, &mut on_event).await;
                        }
                    }
                }
            }
        }

        // Ceiling exceeded: halt with a diagnostic, state left consistent
        tracing::warn!(session_id, "plan-round ceiling exceeded");
        state.gate_status = GateStatus::None;
        state.push(Turn::assistant(CEILING_RESPONSE));
        self.persist(session_id, &state);
        on_event(KernelEvent::Response(CEILING_RESPONSE.to_string()));
        state.turns.split_off(produced_from)
    }

    /// Run every invocation in a granted batch, appending a tool-result
    /// turn per call. Failures were already flattened to text by the
    /// registry; nothing here retries.
    async fn execute_batch<F>(
        &self,
        state: &mut SessionState,
        calls: &[ToolInvocation],
        on_event: &mut F,
    ) where
        F: FnMut(KernelEvent),
    {
        for call in calls {
            on_event(KernelEvent::ToolCall {
                name: call.name.clone(),
                preview: argument_preview(call),
            });

            let result = self.tools.execute(&call.name, &call.arguments).await;

            on_event(KernelEvent::ToolResult {
                name: call.name.clone(),
                preview: truncate(&result, 100),
            });
            state.push(Turn::tool_result(result));
        }
    }

    /// Best-effort log of a final answer into the context store
    fn log_interaction(&self, text: &str) {
        let excerpt = truncate(text, 50);
        if let Err(e) = self
            .context
            .save(&excerpt, &serde_json::json!({"type": "log"}))
        {
            tracing::debug!(error = %e, "interaction log skipped");
        }
    }

    fn persist(&self, session_id: &str, state: &SessionState) {
        debug_assert!(state.gate_invariant_holds());
        if let Err(e) = self.sessions.put(session_id, state) {
            tracing::error!(session_id, error = %e, "failed to persist session state");
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(session_id.to_string()).or_default().clone()
    }
}

/// The batch that was held at the gate: tool calls of the most recent
/// assistant turn.
fn pending_invocations(state: &SessionState) -> Vec<ToolInvocation> {
    state
        .turns
        .iter()
        .rev()
        .find(|t| !t.tool_calls.is_empty())
        .map(|t| t.tool_calls.clone())
        .unwrap_or_default()
}

fn argument_preview(call: &ToolInvocation) -> String {
    let args = &call.arguments;
    let text = args["query"]
        .as_str()
        .or_else(|| args["event_details"].as_str())
        .or_else(|| args["to"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| args.to_string());
    truncate(&text, 100)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SensitiveActions;
    use crate::llm::ChatModel;
    use crate::session::Role;
    use crate::store::NO_PRIOR_MEMORY;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed script of model outputs, one per planning round
    struct ScriptedModel {
        script: Mutex<VecDeque<ModelOutput>>,
    }

    impl ScriptedModel {
        fn new(outputs: Vec<ModelOutput>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outputs.into()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(
            &self,
            _directive: &str,
            _history: &[Turn],
            _tool_schemas: &[Value],
        ) -> Result<ModelOutput, String> {
            Ok(self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ModelOutput::Final("(script exhausted)".to_string())))
        }
    }

    /// Always proposes the same tool call; drives the ceiling test
    struct LoopingModel {
        tool: String,
    }

    #[async_trait]
    impl ChatModel for LoopingModel {
        async fn complete(
            &self,
            _directive: &str,
            _history: &[Turn],
            _tool_schemas: &[Value],
        ) -> Result<ModelOutput, String> {
            Ok(ModelOutput::ToolCalls(vec![ToolInvocation::new(
                self.tool.clone(),
                serde_json::json!({}),
            )]))
        }
    }

    /// Canned tool that counts its invocations
    struct StubTool {
        name: &'static str,
        response: &'static str,
        calls: AtomicUsize,
    }

    impl StubTool {
        fn new(name: &'static str, response: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> Value {
            serde_json::json!({
                "type": "function",
                "function": {"name": self.name, "description": "", "parameters": {"type": "object", "properties": {}}}
            })
        }

        async fn call(&self, _args: &Value) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.to_string())
        }
    }

    #[derive(Default)]
    struct MemStore {
        records: Mutex<Vec<String>>,
    }

    impl ContextStore for MemStore {
        fn save(&self, text: &str, _metadata: &Value) -> Result<String, String> {
            self.records.lock().unwrap().push(text.to_string());
            Ok(format!("id-{}", self.records.lock().unwrap().len()))
        }

        fn retrieve(&self, _query: &str, k: usize) -> Vec<String> {
            let records = self.records.lock().unwrap();
            if records.is_empty() {
                vec![NO_PRIOR_MEMORY.to_string()]
            } else {
                records.iter().rev().take(k).cloned().collect()
            }
        }
    }

    #[derive(Default)]
    struct MemSessions {
        states: Mutex<HashMap<String, SessionState>>,
    }

    impl SessionStore for MemSessions {
        fn get(&self, session_id: &str) -> Option<SessionState> {
            self.states.lock().unwrap().get(session_id).cloned()
        }

        fn put(&self, session_id: &str, state: &SessionState) -> Result<(), String> {
            self.states
                .lock()
                .unwrap()
                .insert(session_id.to_string(), state.clone());
            Ok(())
        }
    }

    struct Fixture {
        kernel: Kernel,
        sessions: Arc<MemSessions>,
        email: Arc<StubTool>,
    }

    fn fixture(model: Arc<dyn ChatModel>) -> Fixture {
        let research = StubTool::new("research", "Gold is trading 5% higher today.");
        let email = StubTool::new("send_email", "✅ Email sent to bob@x.com");

        let mut tools = ToolRegistry::new();
        tools.register(research);
        tools.register(email.clone());

        let sessions = Arc::new(MemSessions::default());
        let kernel = Kernel::new(
            model,
            tools,
            PermissionGate::new(SensitiveActions::default()),
            Arc::new(MemStore::default()),
            sessions.clone(),
        );
        Fixture {
            kernel,
            sessions,
            email,
        }
    }

    fn gate_status(fixture: &Fixture, id: &str) -> GateStatus {
        fixture.sessions.get(id).unwrap().gate_status
    }

    #[tokio::test]
    async fn test_scenario_research_without_gating() {
        let model = ScriptedModel::new(vec![
            ModelOutput::ToolCalls(vec![ToolInvocation::new(
                "research",
                serde_json::json!({"query": "today's gold price"}),
            )]),
            ModelOutput::Final("Gold is up five percent today.".to_string()),
        ]);
        let f = fixture(model);

        let turns = f.kernel.advance("s1", "research today's gold price").await;

        // tool-call proposal, its result, then the terminal answer
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::Assistant);
        assert_eq!(turns[0].tool_calls[0].name, "research");
        assert_eq!(turns[1].role, Role::ToolResult);
        assert!(turns[1].content.contains("5% higher"));
        assert_eq!(turns[2].content, "Gold is up five percent today.");
        assert_eq!(gate_status(&f, "s1"), GateStatus::None);
        assert!(f.sessions.get("s1").unwrap().gate_invariant_holds());
    }

    #[tokio::test]
    async fn test_scenario_email_granted_across_two_calls() {
        let model = ScriptedModel::new(vec![
            ModelOutput::ToolCalls(vec![ToolInvocation::new(
                "send_email",
                serde_json::json!({"to": "bob@x.com", "body": "hi"}),
            )]),
            ModelOutput::Final("Your email to Bob is on its way.".to_string()),
        ]);
        let f = fixture(model);

        // First call suspends on the gate with a single authorization turn
        let turns = f
            .kernel
            .advance("s1", "send an email to bob@x.com saying hi")
            .await;
        let auth: Vec<_> = turns.iter().filter(|t| t.is_authorization_request()).collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gate_status(&f, "s1"), GateStatus::Pending);
        assert!(f.sessions.get("s1").unwrap().gate_invariant_holds());

        // Second call grants; the held batch runs and the turn completes
        let turns = f.kernel.advance("s1", "yes").await;
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 1);
        assert!(turns.iter().any(|t| t.content.contains("Email sent")));
        assert!(turns.iter().any(|t| t.content.contains("on its way")));
        assert_eq!(gate_status(&f, "s1"), GateStatus::None);
    }

    #[tokio::test]
    async fn test_scenario_email_denied() {
        let model = ScriptedModel::new(vec![ModelOutput::ToolCalls(vec![ToolInvocation::new(
            "send_email",
            serde_json::json!({"to": "bob@x.com", "body": "hi"}),
        )])]);
        let f = fixture(model);

        f.kernel
            .advance("s1", "send an email to bob@x.com saying hi")
            .await;
        let turns = f.kernel.advance("s1", "no").await;

        assert_eq!(turns.len(), 1);
        assert!(turns[0].content.contains("cancelled"));
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gate_status(&f, "s1"), GateStatus::None);
        assert!(f.sessions.get("s1").unwrap().gate_invariant_holds());
    }

    #[tokio::test]
    async fn test_ambiguous_reply_denies() {
        let model = ScriptedModel::new(vec![ModelOutput::ToolCalls(vec![ToolInvocation::new(
            "send_email",
            serde_json::json!({"to": "bob@x.com", "body": "hi"}),
        )])]);
        let f = fixture(model);

        f.kernel.advance("s1", "email bob").await;
        let turns = f.kernel.advance("s1", "maybe later").await;

        assert!(turns[0].content.contains("cancelled"));
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_step_ceiling_halts_with_diagnostic() {
        let model = Arc::new(LoopingModel {
            tool: "research".to_string(),
        });
        let f = fixture(model);

        let turns = f.kernel.advance("s1", "loop forever").await;

        let last = turns.last().unwrap();
        assert!(last.content.contains("too many planning steps"));
        // one proposal + one result per round, plus the diagnostic
        assert_eq!(turns.len(), MAX_PLAN_ROUNDS * 2 + 1);
        assert_eq!(gate_status(&f, "s1"), GateStatus::None);
        assert!(f.sessions.get("s1").unwrap().gate_invariant_holds());
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_in_result() {
        let model = ScriptedModel::new(vec![
            ModelOutput::ToolCalls(vec![ToolInvocation::new("teleport", serde_json::json!({}))]),
            ModelOutput::Final("I can't do that.".to_string()),
        ]);
        let f = fixture(model);

        let turns = f.kernel.advance("s1", "teleport me home").await;
        assert!(turns
            .iter()
            .any(|t| t.role == Role::ToolResult && t.content.contains("Unknown tool: teleport")));
    }

    #[tokio::test]
    async fn test_every_call_returns_at_least_one_turn() {
        // Model failure path: planner degrades, kernel still answers
        struct FailingModel;

        #[async_trait]
        impl ChatModel for FailingModel {
            async fn complete(
                &self,
                _directive: &str,
                _history: &[Turn],
                _tool_schemas: &[Value],
            ) -> Result<ModelOutput, String> {
                Err("network down".to_string())
            }
        }

        let f = fixture(Arc::new(FailingModel));
        let turns = f.kernel.advance("s1", "hello").await;
        assert!(!turns.is_empty());
        assert!(turns[0].content.contains("trouble reaching"));
    }

    #[tokio::test]
    async fn test_events_stream_in_order() {
        let model = ScriptedModel::new(vec![
            ModelOutput::ToolCalls(vec![ToolInvocation::new(
                "research",
                serde_json::json!({"query": "gold"}),
            )]),
            ModelOutput::Final("Done.".to_string()),
        ]);
        let f = fixture(model);

        let mut events = vec![];
        f.kernel
            .advance_with_events("s1", "gold price", |e| events.push(e))
            .await;

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                KernelEvent::Thinking => "thinking",
                KernelEvent::PermissionRequest { .. } => "permission",
                KernelEvent::ToolCall { .. } => "tool_call",
                KernelEvent::ToolResult { .. } => "tool_result",
                KernelEvent::Response(_) => "response",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["thinking", "tool_call", "tool_result", "thinking", "response"]
        );
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let model = ScriptedModel::new(vec![ModelOutput::ToolCalls(vec![ToolInvocation::new(
            "send_email",
            serde_json::json!({"to": "a@x.com", "body": "hi"}),
        )])]);
        let f = fixture(model);

        f.kernel.advance("s1", "email a").await;
        assert_eq!(gate_status(&f, "s1"), GateStatus::Pending);

        // A different session id is unaffected by s1's pending gate
        let turns = f.kernel.advance("s2", "hello").await;
        assert!(!turns.is_empty());
        assert_eq!(gate_status(&f, "s2"), GateStatus::None);
        assert_eq!(gate_status(&f, "s1"), GateStatus::Pending);
    }

    #[tokio::test]
    async fn test_state_survives_across_calls() {
        let model = ScriptedModel::new(vec![
            ModelOutput::Final("Hi!".to_string()),
            ModelOutput::Final("Still here.".to_string()),
        ]);
        let f = fixture(model);

        f.kernel.advance("s1", "hello").await;
        f.kernel.advance("s1", "are you there?").await;

        let state = f.sessions.get("s1").unwrap();
        // two user turns and two assistant turns, in order
        assert_eq!(state.turns.len(), 4);
        assert_eq!(state.turns[0].content, "hello");
        assert_eq!(state.turns[3].content, "Still here.");
    }
}
