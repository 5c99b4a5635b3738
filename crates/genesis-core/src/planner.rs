//! Planner: directive assembly and model invocation
//!
//! Each round gets exactly one fresh system directive (system prompt plus a
//! context excerpt). Stale directives from earlier rounds stay in the
//! durable history for audit but are filtered out of the model input so
//! instructions don't accumulate and drift.

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{ChatModel, ModelOutput};
use crate::session::{Role, SessionState, Turn};
use crate::store::{ContextStore, NO_PRIOR_MEMORY};

/// Base system instruction; the voice-first register comes from the product
const SYSTEM_PROMPT: &str = "You are Genesis, a voice-first OS kernel. \
Plan and execute the user's goal step-by-step using tools. \
Keep your final responses extremely concise and conversational, suitable for a voice interface. \
Do not use markdown formatting unless absolutely necessary for clarity.";

/// Appended when the last turn is a tool result. Advisory anti-loop bias:
/// nudges the model toward answering instead of chaining more tool calls
/// for the same request.
const WRAP_UP_HINT: &str = "The requested tool has already run; its result is the last message. \
Prefer answering the user now over calling more tools.";

/// What the planner says when the model itself is unreachable
const DEGRADED_RESPONSE: &str =
    "I'm having trouble reaching my reasoning engine right now. Please try again in a moment.";

/// Builds directives and invokes the model. Infallible from the kernel's
/// point of view: model failures degrade to a plain-text answer.
pub struct Planner {
    model: Arc<dyn ChatModel>,
}

impl Planner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// One planning round over the session.
    ///
    /// Retrieves context for the live request, assembles the directive, and
    /// calls the model with the directive-filtered history.
    pub async fn plan(
        &self,
        state: &SessionState,
        context: &dyn ContextStore,
        tool_schemas: &[Value],
    ) -> ModelOutput {
        let query = state.last_request_text().unwrap_or("User request");
        let excerpt = context.retrieve(query, 5).join("\n");
        let excerpt = if excerpt.is_empty() {
            NO_PRIOR_MEMORY.to_string()
        } else {
            excerpt
        };

        let directive = self.build_directive(state, &excerpt);
        let history = model_history(state);

        match self.model.complete(&directive, &history, tool_schemas).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "model call failed, degrading to fallback response");
                ModelOutput::Final(DEGRADED_RESPONSE.to_string())
            }
        }
    }

    fn build_directive(&self, state: &SessionState, context_excerpt: &str) -> String {
        let mut directive = format!("{}\nMEMORY CONTEXT: {}", SYSTEM_PROMPT, context_excerpt);
        if state
            .last_turn()
            .map(|t| t.role == Role::ToolResult)
            .unwrap_or(false)
        {
            directive.push('\n');
            directive.push_str(WRAP_UP_HINT);
        }
        directive
    }
}

/// History as the model sees it: everything except system directives, which
/// are replaced by the single fresh one the planner builds per round.
fn model_history(state: &SessionState) -> Vec<Turn> {
    state
        .turns
        .iter()
        .filter(|t| t.role != Role::SystemDirective)
        .cloned()
        .collect()
}
