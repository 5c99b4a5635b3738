//! Tool definitions and execution
//!
//! Tools are registered by name with an OpenAI-style function schema and
//! executed with structured arguments. Execution never raises: unknown
//! tools and tool failures come back as descriptive text so the planner can
//! react on the next round. No automatic retries at this layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::store::ContextStore;

/// A named tool with a schema and a side-effecting implementation.
///
/// `call` errors are strings; the registry flattens them into the text
/// result it hands back to the kernel.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// OpenAI-compatible function schema advertised to the model
    fn schema(&self) -> Value;

    async fn call(&self, args: &Value) -> Result<String, String>;
}

/// Name-keyed tool collection; the executor of the kernel's granted calls
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Last registration wins on name collision.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Schemas for every registered tool, in registration order
    pub fn schemas(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute a tool by name. Always yields text: unknown names and tool
    /// errors are reported in the result, never propagated.
    pub async fn execute(&self, name: &str, args: &Value) -> String {
        match self.tools.get(name) {
            Some(tool) => match tool.call(args).await {
                Ok(output) => output,
                Err(e) => format!("Tool '{}' failed: {}", name, e),
            },
            None => format!("Unknown tool: {}", name),
        }
    }
}

/// Registry pre-loaded with the built-in tool set
pub fn builtin_registry(
    context: Arc<dyn ContextStore>,
    http_client: reqwest::Client,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ResearchTool::new(http_client)));
    registry.register(Arc::new(CalendarTool));
    registry.register(Arc::new(EmailTool));
    registry.register(Arc::new(RememberTool::new(context.clone())));
    registry.register(Arc::new(RecallTool::new(context)));
    registry
}

// --- Built-in tools ---

/// Live web search via the DuckDuckGo HTML endpoint (no API key needed)
pub struct ResearchTool {
    client: reqwest::Client,
}

impl ResearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse_snippets(html: &str) -> Vec<String> {
        let mut results = Vec::new();
        for (i, chunk) in html.split("result__snippet").enumerate() {
            if i == 0 || results.len() >= 6 {
                continue;
            }
            if let Some(start) = chunk.find('>') {
                if let Some(end) = chunk[start..].find('<') {
                    let snippet = &chunk[start + 1..start + end];
                    let clean: String = snippet
                        .replace("&quot;", "\"")
                        .replace("&amp;", "&")
                        .replace("&lt;", "<")
                        .replace("&gt;", ">")
                        .replace("&#39;", "'")
                        .chars()
                        .filter(|c| !c.is_control())
                        .collect();
                    let trimmed = clean.trim();
                    if trimmed.len() > 20 {
                        results.push(format!("• {}", trimmed));
                    }
                }
            }
        }
        results
    }
}

#[async_trait]
impl Tool for ResearchTool {
    fn name(&self) -> &str {
        "research"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "research",
                "description": "Search the web for real-time information (prices, news, facts).",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The search query" }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    async fn call(&self, args: &Value) -> Result<String, String> {
        let query = args["query"].as_str().unwrap_or("");
        if query.is_empty() {
            return Err("no search query provided".to_string());
        }

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );

        let html = self
            .client
            .get(&url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
            )
            .send()
            .await
            .map_err(|e| format!("search request failed: {}", e))?
            .text()
            .await
            .map_err(|e| format!("error reading response: {}", e))?;

        let results = Self::parse_snippets(&html);
        if results.is_empty() {
            Ok("No results found - try rephrasing your search".to_string())
        } else {
            Ok(format!(
                "🔍 Search results for '{}':\n\n{}",
                query,
                results.join("\n")
            ))
        }
    }
}

/// Calendar scheduling. The real calendar API is an external collaborator;
/// this stub acknowledges the event so the flow can be exercised end to end.
pub struct CalendarTool;

#[async_trait]
impl Tool for CalendarTool {
    fn name(&self) -> &str {
        "calendar:create"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "calendar:create",
                "description": "Schedule an event on the user's calendar.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "event_details": { "type": "string", "description": "What to schedule, including time" }
                    },
                    "required": ["event_details"]
                }
            }
        })
    }

    async fn call(&self, args: &Value) -> Result<String, String> {
        let details = args["event_details"].as_str().unwrap_or("");
        if details.is_empty() {
            return Err("no event details provided".to_string());
        }
        tracing::info!(details, "calendar event scheduled");
        Ok(format!("📅 Event scheduled: {}", details))
    }
}

/// Email dispatch. Transport is an external collaborator; this stub reports
/// success with the envelope so the gate → executor path is real.
pub struct EmailTool;

#[async_trait]
impl Tool for EmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "send_email",
                "description": "Send an email on the user's behalf.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": { "type": "string", "description": "Recipient address" },
                        "subject": { "type": "string", "description": "Subject line" },
                        "body": { "type": "string", "description": "Message body" }
                    },
                    "required": ["to", "body"]
                }
            }
        })
    }

    async fn call(&self, args: &Value) -> Result<String, String> {
        let to = args["to"].as_str().unwrap_or("");
        if to.is_empty() {
            return Err("no recipient provided".to_string());
        }
        let subject = args["subject"].as_str().unwrap_or("(no subject)");
        tracing::info!(to, subject, "email dispatched");
        Ok(format!("✅ Email sent to {} ({})", to, subject))
    }
}

/// Persist a fact into the context store
pub struct RememberTool {
    context: Arc<dyn ContextStore>,
}

impl RememberTool {
    pub fn new(context: Arc<dyn ContextStore>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "remember",
                "description": "Store information in persistent memory. Use for facts, preferences, important details about the user.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string", "description": "The information to remember" },
                        "category": { "type": "string", "description": "Category of memory, e.g. fact, preference, task" }
                    },
                    "required": ["content"]
                }
            }
        })
    }

    async fn call(&self, args: &Value) -> Result<String, String> {
        let content = args["content"].as_str().unwrap_or("");
        if content.is_empty() {
            return Err("nothing to remember".to_string());
        }
        let metadata = serde_json::json!({
            "category": args["category"].as_str().unwrap_or("fact"),
        });
        self.context.save(content, &metadata)?;
        Ok(format!("✅ Remembered: {}", content))
    }
}

/// Retrieve relevant facts from the context store
pub struct RecallTool {
    context: Arc<dyn ContextStore>,
}

impl RecallTool {
    pub fn new(context: Arc<dyn ContextStore>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "recall",
                "description": "Search persistent memory for relevant facts.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search term to find relevant memories" },
                        "limit": { "type": "number", "description": "Max memories to return (default 5)" }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    async fn call(&self, args: &Value) -> Result<String, String> {
        let query = args["query"].as_str().unwrap_or("");
        let limit = args["limit"].as_u64().unwrap_or(5) as usize;
        let memories = self.context.retrieve(query, limit);
        Ok(format!(
            "🧠 Recalled memories:\n{}",
            memories
                .iter()
                .map(|m| format!("• {}", m))
                .collect::<Vec<_>>()
                .join("\n")
        ))
    }
}
