//! Provider Adapter (C1): turns an OpenAI-compatible chat-completions
//! streaming endpoint into a vendor-agnostic sequence of [`StreamChunk`]s,
//! hiding reasoning-field quirks and split tool-call chunks from callers.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::retry::{retry_with_backoff_conditional, RetryConfig};
use crate::types::{AgentOptions, Message, MessageRole, StreamChunk, Usage};
use crate::{Error, Result};

// ============================================================================
// WIRE FORMAT (OpenAI-compatible chat-completions)
// ============================================================================

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

fn to_wire_messages(system_prompt: &str, history: &[Message]) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: Some(system_prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in history {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };

        // Some vendors reject history containing a malformed tool_call (no
        // id or no function name); drop those before sending.
        let tool_calls = message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .filter(|c| !c.id.is_empty() && !c.function_name.is_empty())
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    call_type: "function",
                    function: WireFunctionCall {
                        name: c.function_name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect::<Vec<_>>()
        });
        let tool_calls = tool_calls.filter(|v| !v.is_empty());

        messages.push(WireMessage {
            role,
            content: Some(message.content.as_text()),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        });
    }

    messages
}

// ============================================================================
// REASONING-AWARE, TOOL-CALL-AWARE AGGREGATOR
// ============================================================================

/// Per-response state that turns raw wire chunks into [`StreamChunk`]s,
/// hiding the reasoning-field and split-tool-call vendor quirks described in
/// the adapter's contract.
struct ChunkAggregator {
    in_think_tag: bool,
    double_newline_decided: bool,
    double_newline_buffer: String,
    active_tool_call_id: Option<String>,
    tool_call_names: HashMap<String, String>,
}

impl ChunkAggregator {
    fn new() -> Self {
        Self {
            in_think_tag: false,
            double_newline_decided: false,
            double_newline_buffer: String::new(),
            active_tool_call_id: None,
            tool_call_names: HashMap::new(),
        }
    }

    fn process(&mut self, chunk: WireChunk) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let usage = chunk.usage.map(Usage::from);

        for choice in chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content.or(choice.delta.reasoning) {
                self.double_newline_decided = true; // vendor told us explicitly
                if !reasoning.is_empty() {
                    out.push(StreamChunk::ContentDelta {
                        text: reasoning,
                        is_reasoning: true,
                    });
                }
            }

            if let Some(content) = choice.delta.content {
                out.extend(self.process_plain_content(content));
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for delta in tool_calls {
                    out.push(self.process_tool_call_delta(delta));
                }
            }

            if choice.finish_reason.is_some() {
                self.flush_double_newline_buffer(&mut out);
                out.push(StreamChunk::Done { usage: usage.clone() });
            }
        }

        out
    }

    fn process_plain_content(&mut self, content: String) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let mut remaining = content.as_str();

        // <think>...</think> tag convention.
        loop {
            if self.in_think_tag {
                if let Some(idx) = remaining.find("</think>") {
                    let (reasoning, rest) = remaining.split_at(idx);
                    if !reasoning.is_empty() {
                        out.push(StreamChunk::ContentDelta {
                            text: reasoning.to_string(),
                            is_reasoning: true,
                        });
                    }
                    self.in_think_tag = false;
                    remaining = &rest["</think>".len()..];
                    continue;
                } else {
                    if !remaining.is_empty() {
                        out.push(StreamChunk::ContentDelta {
                            text: remaining.to_string(),
                            is_reasoning: true,
                        });
                    }
                    return out;
                }
            } else if let Some(idx) = remaining.find("<think>") {
                let (normal, rest) = remaining.split_at(idx);
                self.push_normal(normal, &mut out);
                self.in_think_tag = true;
                remaining = &rest["<think>".len()..];
                continue;
            } else {
                self.push_normal(remaining, &mut out);
                return out;
            }
        }
    }

    /// Apply the double-newline reasoning convention: text before the first
    /// `\n\n` of a response is reasoning, everything after is normal. Once
    /// decided (boundary found, or an explicit reasoning field seen, or the
    /// response finished without a boundary) the decision holds for the
    /// remainder of this response.
    fn push_normal(&mut self, text: &str, out: &mut Vec<StreamChunk>) {
        if text.is_empty() {
            return;
        }
        if self.double_newline_decided {
            out.push(StreamChunk::ContentDelta {
                text: text.to_string(),
                is_reasoning: false,
            });
            return;
        }

        self.double_newline_buffer.push_str(text);
        if let Some(idx) = self.double_newline_buffer.find("\n\n") {
            let reasoning = self.double_newline_buffer[..idx].to_string();
            let rest = self.double_newline_buffer[idx + 2..].to_string();
            if !reasoning.is_empty() {
                out.push(StreamChunk::ContentDelta {
                    text: reasoning,
                    is_reasoning: true,
                });
            }
            if !rest.is_empty() {
                out.push(StreamChunk::ContentDelta {
                    text: rest,
                    is_reasoning: false,
                });
            }
            self.double_newline_decided = true;
            self.double_newline_buffer.clear();
        }
    }

    fn flush_double_newline_buffer(&mut self, out: &mut Vec<StreamChunk>) {
        if !self.double_newline_decided && !self.double_newline_buffer.is_empty() {
            out.push(StreamChunk::ContentDelta {
                text: std::mem::take(&mut self.double_newline_buffer),
                is_reasoning: false,
            });
        }
        self.double_newline_decided = true;
    }

    fn process_tool_call_delta(&mut self, delta: WireToolCallDelta) -> StreamChunk {
        let id = delta.id.or_else(|| {
            if delta.function.as_ref().and_then(|f| f.name.as_ref()).is_some() {
                None
            } else {
                self.active_tool_call_id.clone()
            }
        });

        if let Some(id) = &id {
            self.active_tool_call_id = Some(id.clone());
        }

        let name = delta.function.as_ref().and_then(|f| f.name.clone());
        if let (Some(id), Some(name)) = (&id, &name) {
            self.tool_call_names.insert(id.clone(), name.clone());
        }

        let arguments_delta = delta
            .function
            .and_then(|f| f.arguments)
            .unwrap_or_default();

        let _ = delta.index; // vendor index is only used to demux on their side

        StreamChunk::ToolCallDelta {
            id,
            name,
            arguments_delta,
        }
    }
}

// ============================================================================
// SLIDING-WINDOW RATE LIMITER (optional, per-provider)
// ============================================================================

/// Permits at most `limit` calls per `window`; callers beyond the limit wait
/// out the remainder of the window before proceeding.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    calls: tokio::sync::Mutex<Vec<std::time::Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = std::time::Instant::now();
                calls.retain(|t| now.duration_since(*t) < self.window);
                if calls.len() < self.limit {
                    calls.push(now);
                    None
                } else {
                    let oldest = calls[0];
                    Some(self.window - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

// ============================================================================
// PROVIDER ADAPTER
// ============================================================================

pub struct ProviderAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: f32,
    rate_limiter: Option<RateLimiter>,
}

impl ProviderAdapter {
    pub fn from_options(options: &AgentOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            base_url: options.base_url.as_str().to_string(),
            api_key: options.api_key.clone(),
            model: options.model.as_str().to_string(),
            max_tokens: options.max_tokens,
            temperature: options.temperature.value(),
            rate_limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Rough context budget for this model family. The teacher's
    /// single-provider assumption means this is a static table rather than a
    /// per-request API call.
    pub fn max_context_size(&self) -> u32 {
        if self.model.contains("32k") {
            32_000
        } else if self.model.contains("128k") {
            128_000
        } else {
            128_000
        }
    }

    #[instrument(skip(self, history, tool_schemas), fields(model = %self.model))]
    pub async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        tool_schemas: &[Value],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let messages = to_wire_messages(system_prompt, history);
        let tools = (!tool_schemas.is_empty()).then_some(tool_schemas);
        let request = WireRequest {
            model: &self.model,
            messages,
            stream: true,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = retry_with_backoff_conditional(RetryConfig::default(), || async {
            let response = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(Error::Http)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let detail = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                return Err(Error::Provider {
                    status: Some(status),
                    detail,
                });
            }

            Ok(response)
        })
        .await?;

        let mut aggregator = ChunkAggregator::new();
        let events = response.bytes_stream().eventsource();

        let stream = events.filter_map(move |event| {
            let result = match event {
                Ok(event) => {
                    if event.data == "[DONE]" {
                        None
                    } else {
                        match serde_json::from_str::<WireChunk>(&event.data) {
                            Ok(chunk) => Some(aggregator.process(chunk)),
                            Err(e) => {
                                warn!(error = %e, "dropping unparseable provider chunk");
                                None
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed SSE event");
                    None
                }
            };
            async move { result }
        });

        let flattened = stream.flat_map(|chunks| futures::stream::iter(chunks.into_iter().map(Ok)));
        Ok(Box::pin(flattened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(delta: WireDelta, finish_reason: Option<&str>) -> WireChoice {
        WireChoice {
            delta,
            finish_reason: finish_reason.map(str::to_string),
        }
    }

    #[test]
    fn aggregates_plain_text_deltas() {
        let mut agg = ChunkAggregator::new();
        let out = agg.process(WireChunk {
            choices: vec![choice(
                WireDelta {
                    content: Some("Hello".to_string()),
                    ..Default::default()
                },
                None,
            )],
            usage: None,
        });
        assert_eq!(out.len(), 1);
        match &out[0] {
            StreamChunk::ContentDelta { text, is_reasoning } => {
                assert_eq!(text, "Hello");
                assert!(!is_reasoning);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reasoning_content_field_marks_is_reasoning() {
        let mut agg = ChunkAggregator::new();
        let out = agg.process(WireChunk {
            choices: vec![choice(
                WireDelta {
                    reasoning_content: Some("thinking...".to_string()),
                    ..Default::default()
                },
                None,
            )],
            usage: None,
        });
        assert!(matches!(
            &out[0],
            StreamChunk::ContentDelta { is_reasoning: true, .. }
        ));
    }

    #[test]
    fn think_tags_are_stripped_and_marked_reasoning() {
        let mut agg = ChunkAggregator::new();
        let out = agg.process(WireChunk {
            choices: vec![choice(
                WireDelta {
                    content: Some("<think>pondering</think>answer".to_string()),
                    ..Default::default()
                },
                None,
            )],
            usage: None,
        });
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[0],
            StreamChunk::ContentDelta { is_reasoning: true, text } if text == "pondering"
        ));
        assert!(matches!(
            &out[1],
            StreamChunk::ContentDelta { is_reasoning: false, text } if text == "answer"
        ));
    }

    #[test]
    fn double_newline_convention_splits_once() {
        let mut agg = ChunkAggregator::new();
        let out = agg.process(WireChunk {
            choices: vec![choice(
                WireDelta {
                    content: Some("reasoning preamble\n\nfinal answer".to_string()),
                    ..Default::default()
                },
                None,
            )],
            usage: None,
        });
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], StreamChunk::ContentDelta { is_reasoning: true, .. }));
        assert!(matches!(&out[1], StreamChunk::ContentDelta { is_reasoning: false, .. }));

        // Mode stays decided: a later chunk with another \n\n is NOT re-split.
        let out2 = agg.process(WireChunk {
            choices: vec![choice(
                WireDelta {
                    content: Some(" more\n\ntext".to_string()),
                    ..Default::default()
                },
                None,
            )],
            usage: None,
        });
        assert_eq!(out2.len(), 1);
        assert!(matches!(&out2[0], StreamChunk::ContentDelta { is_reasoning: false, .. }));
    }

    #[test]
    fn tool_call_delta_without_id_continues_active_call() {
        let mut agg = ChunkAggregator::new();
        let first = agg.process_tool_call_delta(WireToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            function: Some(WireFunctionDelta {
                name: Some("search".to_string()),
                arguments: Some("{\"q\":".to_string()),
            }),
        });
        match first {
            StreamChunk::ToolCallDelta { id, name, .. } => {
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("search"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let second = agg.process_tool_call_delta(WireToolCallDelta {
            index: 0,
            id: None,
            function: Some(WireFunctionDelta {
                name: None,
                arguments: Some("\"rust\"}".to_string()),
            }),
        });
        match second {
            StreamChunk::ToolCallDelta { arguments_delta, .. } => {
                assert_eq!(arguments_delta, "\"rust\"}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn finish_reason_emits_done_with_usage() {
        let mut agg = ChunkAggregator::new();
        let out = agg.process(WireChunk {
            choices: vec![choice(WireDelta::default(), Some("stop"))],
            usage: Some(WireUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        });
        assert!(matches!(out.last(), Some(StreamChunk::Done { usage: Some(_) })));
    }

    #[test]
    fn filters_malformed_tool_calls_from_history() {
        let history = vec![Message::assistant_with_tool_calls(
            crate::types::Content::Text(String::new()),
            vec![
                crate::types::ToolCall {
                    id: String::new(),
                    function_name: "broken".into(),
                    arguments: "{}".into(),
                },
                crate::types::ToolCall {
                    id: "ok_1".into(),
                    function_name: "fine".into(),
                    arguments: "{}".into(),
                },
            ],
        )];
        let wire = to_wire_messages("", &history);
        let calls = wire[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "ok_1");
    }
}
