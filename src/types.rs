//! Core data model: messages, content, tool calls, checkpoints, and the
//! handful of small newtypes used to validate agent configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hooks::Hooks;
use crate::tools::Tool;

// ============================================================================
// NEWTYPES
// ============================================================================

/// A validated, non-empty model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::config("model name must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated base URL (must parse and use http/https).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| crate::Error::config(format!("invalid base_url '{url}': {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(crate::Error::config(format!(
                "base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sampling temperature, clamped to the range providers generally accept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> crate::Result<Self> {
        if !(0.0..=2.0).contains(&value) {
            return Err(crate::Error::config(format!(
                "temperature must be between 0.0 and 2.0, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

// ============================================================================
// CONTENT
// ============================================================================

/// One part of a multi-part message body. Reasoning parts carry model
/// "thinking" output and are kept separate from normal assistant text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text(TextPart),
    Image(ImagePart),
    Reasoning(ReasoningPart),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningPart {
    pub text: String,
}

impl ReasoningPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    pub url: String,
    #[serde(default)]
    pub detail: ImageDetail,
}

impl ImagePart {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detail: ImageDetail::default(),
        }
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }
}

/// A message body: either plain text, or an ordered list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Flatten to a plain string, joining text/reasoning parts and dropping
    /// images. Used for providers and history views that want a single string.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text(t) => Some(t.text.as_str()),
                    ContentPart::Reasoning(r) => Some(r.text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Parts(p) => p.is_empty(),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

// ============================================================================
// TOOL CALLS
// ============================================================================

/// A single tool invocation requested by the model. `arguments` is the raw,
/// possibly-malformed JSON text as emitted by the provider; it is only
/// normalized/parsed at dispatch time (see `normalizer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments: String,
}

impl ToolCall {
    /// The `name:arguments` signature used for repeated-failure detection.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.function_name, self.arguments)
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Content::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Content::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// An assistant message carrying only text (no tool calls).
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Content::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// An assistant message with accompanying tool calls. `content` may be
    /// empty if the model produced only tool calls.
    pub fn assistant_with_tool_calls(content: Content, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Content::Text(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

// ============================================================================
// CHECKPOINT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    Initial,
    Step,
}

#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub id: u64,
    pub history_len: usize,
    pub tag: CheckpointTag,
}

// ============================================================================
// TOOL RESULT
// ============================================================================

/// Outcome of dispatching a single tool call through the registry.
#[derive(Debug, Clone)]
pub enum ToolResult {
    Ok {
        output: serde_json::Value,
        message: String,
    },
    Error {
        output: Option<serde_json::Value>,
        message: String,
    },
    Rejected {
        reason: String,
    },
}

impl ToolResult {
    /// Render as the text placed in the paired tool-role message.
    pub fn to_message_text(&self) -> String {
        match self {
            ToolResult::Ok { message, .. } => message.clone(),
            ToolResult::Error { message, output } => match output {
                Some(o) => format!("Error: {message} ({o})"),
                None => format!("Error: {message}"),
            },
            ToolResult::Rejected { reason } => reason.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }
}

// ============================================================================
// STREAM CHUNK
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single normalized unit of a provider's streaming response, after C1 has
/// hidden vendor-specific quirks (reasoning fields, split tool-call chunks).
#[derive(Debug, Clone)]
pub enum StreamChunk {
    ContentDelta { text: String, is_reasoning: bool },
    ToolCallDelta {
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    Done { usage: Option<Usage> },
}

// ============================================================================
// SKILL SPEC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillScope {
    Global,
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(skip)]
    pub body: String,
    #[serde(default = "default_scope")]
    pub scope: SkillScope,
}

fn default_scope() -> SkillScope {
    SkillScope::Global
}

// ============================================================================
// AGENT OPTIONS
// ============================================================================

/// Per-run tunables for the agent loop and its collaborators. Construct via
/// [`AgentOptions::builder`].
#[derive(Clone)]
pub struct AgentOptions {
    pub system_prompt: Option<String>,
    pub model: ModelName,
    pub base_url: BaseUrl,
    pub api_key: String,
    pub max_tokens: Option<u32>,
    pub temperature: Temperature,
    pub timeout: u64,
    pub tools: Vec<Arc<Tool>>,
    pub auto_execute_tools: bool,
    pub max_tool_iterations: u32,
    pub max_steps_per_run: u32,
    pub max_thinking_steps: u32,
    pub reserved_context_tokens: u32,
    pub hooks: Hooks,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***redacted***")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("tools", &self.tools.len())
            .field("auto_execute_tools", &self.auto_execute_tools)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("max_steps_per_run", &self.max_steps_per_run)
            .field("max_thinking_steps", &self.max_thinking_steps)
            .field("reserved_context_tokens", &self.reserved_context_tokens)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }
}

#[derive(Default)]
pub struct AgentOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    tools: Vec<Arc<Tool>>,
    auto_execute_tools: Option<bool>,
    max_tool_iterations: Option<u32>,
    max_steps_per_run: Option<u32>,
    max_thinking_steps: Option<u32>,
    reserved_context_tokens: Option<u32>,
    hooks: Option<Hooks>,
}

impl AgentOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn tool(mut self, tool: Arc<Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn auto_execute_tools(mut self, value: bool) -> Self {
        self.auto_execute_tools = Some(value);
        self
    }

    pub fn max_tool_iterations(mut self, value: u32) -> Self {
        self.max_tool_iterations = Some(value);
        self
    }

    pub fn max_steps_per_run(mut self, value: u32) -> Self {
        self.max_steps_per_run = Some(value);
        self
    }

    pub fn max_thinking_steps(mut self, value: u32) -> Self {
        self.max_thinking_steps = Some(value);
        self
    }

    pub fn reserved_context_tokens(mut self, value: u32) -> Self {
        self.reserved_context_tokens = Some(value);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> crate::Result<AgentOptions> {
        let model = ModelName::new(
            self.model
                .ok_or_else(|| crate::Error::config("model is required"))?,
        )?;
        let base_url = BaseUrl::new(
            self.base_url
                .ok_or_else(|| crate::Error::config("base_url is required"))?,
        )?;
        let temperature = Temperature::new(self.temperature.unwrap_or(0.7))?;

        if let Some(mt) = self.max_tokens {
            if mt == 0 {
                return Err(crate::Error::config("max_tokens must be greater than 0"));
            }
        }

        Ok(AgentOptions {
            system_prompt: self.system_prompt,
            model,
            base_url,
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            max_tokens: self.max_tokens.or(Some(4096)),
            temperature,
            timeout: self.timeout.unwrap_or(300),
            tools: self.tools,
            auto_execute_tools: self.auto_execute_tools.unwrap_or(true),
            max_tool_iterations: self.max_tool_iterations.unwrap_or(5),
            max_steps_per_run: self.max_steps_per_run.unwrap_or(50),
            max_thinking_steps: self.max_thinking_steps.unwrap_or(5),
            reserved_context_tokens: self.reserved_context_tokens.unwrap_or(50_000),
            hooks: self.hooks.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_rejects_empty() {
        assert!(ModelName::new("").is_err());
        assert!(ModelName::new("qwen2.5").is_ok());
    }

    #[test]
    fn base_url_rejects_bad_scheme() {
        assert!(BaseUrl::new("ftp://localhost/v1").is_err());
        assert!(BaseUrl::new("http://localhost:1234/v1").is_ok());
    }

    #[test]
    fn temperature_range() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(1.0).is_ok());
    }

    #[test]
    fn builder_requires_model_and_base_url() {
        let err = AgentOptions::builder().build().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn builder_happy_path() {
        let opts = AgentOptions::builder()
            .model("qwen2.5-32b")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();
        assert_eq!(opts.model.as_str(), "qwen2.5-32b");
        assert_eq!(opts.max_thinking_steps, 5);
        assert_eq!(opts.reserved_context_tokens, 50_000);
    }

    #[test]
    fn tool_call_signature() {
        let tc = ToolCall {
            id: "a".into(),
            function_name: "add".into(),
            arguments: "{\"x\":1}".into(),
        };
        assert_eq!(tc.signature(), "add:{\"x\":1}");
    }

    #[test]
    fn message_has_tool_calls() {
        let m = Message::assistant_with_tool_calls(
            Content::Text(String::new()),
            vec![ToolCall {
                id: "a".into(),
                function_name: "f".into(),
                arguments: "{}".into(),
            }],
        );
        assert!(m.has_tool_calls());
        assert!(!Message::assistant_text("hi").has_tool_calls());
    }
}
