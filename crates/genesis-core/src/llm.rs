//! Chat-model provider abstraction
//!
//! The model boundary normalizes whatever the wire gives us into
//! [`ModelOutput`]: either a final text answer or a list of proposed tool
//! invocations. Nothing downstream ever pokes at raw response JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{Role, ToolInvocation, Turn};

/// Model configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),
}

/// Configuration for the HTTP model provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub temperature: f64,
}

impl ModelConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "meta-llama/llama-3.1-8b-instruct".to_string(),
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            temperature: 0.0,
        }
    }

    /// Read the API key from `OPENROUTER_API_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        std::env::var("OPENROUTER_API_KEY")
            .map(Self::new)
            .map_err(|_| ConfigError::MissingApiKey("OPENROUTER_API_KEY"))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Normalized model output: terminal text or proposed tool calls
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Plain text; the turn is over
    Final(String),
    /// One or more tool invocations for the kernel to route through the gate
    ToolCalls(Vec<ToolInvocation>),
}

/// Trait for chat-model providers.
///
/// `directive` is the single fresh system instruction for this round;
/// `history` is the conversation with stale directives already filtered by
/// the planner. Errors are plain strings; the planner substitutes a
/// degraded-mode answer, it never propagates them.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        directive: &str,
        history: &[Turn],
        tool_schemas: &[Value],
    ) -> Result<ModelOutput, String>;
}

/// OpenRouter-compatible chat-completions provider
pub struct OpenRouterModel {
    config: ModelConfig,
    client: reqwest::Client,
}

impl OpenRouterModel {
    pub fn new(config: ModelConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::SystemDirective => "system",
            Role::ToolResult => "tool",
        }
    }

    /// Serialize history into chat-completions messages.
    ///
    /// Tool-result turns follow their proposing assistant turn in order, so
    /// call ids are correlated positionally.
    fn build_messages(directive: &str, history: &[Turn]) -> Vec<Value> {
        let mut messages = vec![serde_json::json!({"role": "system", "content": directive})];
        let mut open_call_ids: std::collections::VecDeque<String> = Default::default();

        for turn in history {
            let mut msg = serde_json::json!({
                "role": Self::wire_role(turn.role),
                "content": turn.content,
            });
            if !turn.tool_calls.is_empty() {
                open_call_ids.clear();
                msg["tool_calls"] = turn
                    .tool_calls
                    .iter()
                    .enumerate()
                    .map(|(i, call)| {
                        let id = format!("call_{}_{}", turn.id.simple(), i);
                        open_call_ids.push_back(id.clone());
                        serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect::<Vec<_>>()
                    .into();
            }
            if turn.role == Role::ToolResult {
                let id = open_call_ids
                    .pop_front()
                    .unwrap_or_else(|| format!("call_{}", turn.id.simple()));
                msg["tool_call_id"] = Value::String(id);
            }
            messages.push(msg);
        }
        messages
    }

    /// Normalize a chat-completions `message` object into [`ModelOutput`].
    ///
    /// Arguments arrive as a JSON-encoded string; malformed argument
    /// payloads degrade to an empty object rather than failing the round.
    fn normalize(message: &Value) -> ModelOutput {
        match message.get("tool_calls").and_then(|tc| tc.as_array()) {
            Some(calls) if !calls.is_empty() => {
                let invocations = calls
                    .iter()
                    .map(|call| {
                        let name = call["function"]["name"].as_str().unwrap_or("").to_string();
                        let arguments = call["function"]["arguments"]
                            .as_str()
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or_else(|| serde_json::json!({}));
                        ToolInvocation { name, arguments }
                    })
                    .collect();
                ModelOutput::ToolCalls(invocations)
            }
            _ => ModelOutput::Final(
                message["content"]
                    .as_str()
                    .unwrap_or("(no response)")
                    .to_string(),
            ),
        }
    }
}

#[async_trait]
impl ChatModel for OpenRouterModel {
    async fn complete(
        &self,
        directive: &str,
        history: &[Turn],
        tool_schemas: &[Value],
    ) -> Result<ModelOutput, String> {
        let messages = Self::build_messages(directive, history);

        let resp = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": self.config.model,
                "messages": messages,
                "tools": tool_schemas,
                "tool_choice": "auto",
                "temperature": self.config.temperature,
            }))
            .send()
            .await
            .map_err(|e| format!("API request failed: {}", e))?;

        let json: Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse API response: {}", e))?;

        if let Some(err) = json.get("error") {
            let msg = err["message"].as_str().unwrap_or("Unknown API error");
            tracing::warn!(error = msg, "model API returned an error");
            return Err(msg.to_string());
        }

        Ok(Self::normalize(&json["choices"][0]["message"]))
    }
}
