//! Agent Executor (C7): the main loop. Pulls a provider stream, folds it
//! into an assistant message, dispatches any tool calls through the
//! registry, and keeps going until the model stops asking for tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::bus::{Bus, BusEvent, ToolResultSummary};
use crate::compactor::{self, LlmCallable};
use crate::context::ContextStore;
use crate::hooks::{PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent};
use crate::registry::ToolRegistry;
use crate::skills::SkillMatcher;
use crate::types::{
    AgentOptions, CheckpointTag, Content, Message, MessageRole, SkillScope, StreamChunk, ToolCall,
    ToolResult,
};
use crate::{Error, Result};
use crate::provider::ProviderAdapter;

const ERROR_RING_SIZE: usize = 3;
const COMPACTION_TAIL_LEN: usize = 4;

/// What the caller should do after one `agentLoopStep`.
enum StepOutcome {
    Continue,
    Done,
}

/// A partially-accumulated tool call, keyed by arrival order rather than by
/// id (some vendors send the id in a later chunk than the first delta).
#[derive(Default, Clone)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PendingToolCall {
    fn finish(self) -> Option<ToolCall> {
        Some(ToolCall {
            id: self.id?,
            function_name: self.name.unwrap_or_default(),
            arguments: self.arguments,
        })
    }
}

pub struct Executor {
    options: AgentOptions,
    provider: ProviderAdapter,
    registry: ToolRegistry,
    context: ContextStore,
    matcher: Option<SkillMatcher>,
    active_skill_scopes: Vec<SkillScope>,
    bus: Bus,
    interrupt: Arc<AtomicBool>,
    error_ring: VecDeque<String>,
}

impl Executor {
    pub fn new(options: AgentOptions, registry: ToolRegistry) -> Result<Self> {
        let provider = ProviderAdapter::from_options(&options)?;
        Ok(Self {
            options,
            provider,
            registry,
            context: ContextStore::new(),
            matcher: None,
            active_skill_scopes: vec![SkillScope::Global, SkillScope::Project],
            bus: Bus::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
            error_ring: VecDeque::with_capacity(ERROR_RING_SIZE),
        })
    }

    pub fn with_skill_matcher(mut self, matcher: SkillMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_persistence(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.context = std::mem::replace(&mut self.context, ContextStore::new()).with_persistence(path);
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn history(&self) -> &[Message] {
        self.context.history()
    }

    /// Best-effort `Value` snapshot of history, for hook event payloads.
    fn history_as_values(&self) -> Vec<serde_json::Value> {
        self.context
            .history()
            .iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .collect()
    }

    /// Top-level entry point: append the user turn and drive the loop until
    /// it produces a final answer, hits a hard failure, or is interrupted.
    #[instrument(skip(self, user_input))]
    pub async fn execute(&mut self, user_input: &str) -> Result<()> {
        self.interrupt.store(false, Ordering::SeqCst);

        let mut prompt = user_input.to_string();
        let event = UserPromptSubmitEvent::new(prompt.clone(), self.history_as_values());
        if let Some(decision) = self.options.hooks.execute_user_prompt_submit(event).await {
            if !decision.continue_execution {
                info!(reason = ?decision.reason, "user_prompt_submit hook blocked this turn");
                self.context.append(Message::assistant_text(
                    decision
                        .reason
                        .unwrap_or_else(|| "This prompt was blocked before it reached the model.".to_string()),
                ))?;
                return Ok(());
            }
            if let Some(modified) = decision.modified_prompt {
                prompt = modified;
            }
        }

        self.context.append(Message::user(prompt))?;
        self.context.ensure_initial_checkpoint();

        let mut step = 1u32;
        loop {
            match self.agent_loop_step(step).await? {
                StepOutcome::Continue => step += 1,
                StepOutcome::Done => return Ok(()),
            }
        }
    }

    async fn maybe_compact(&mut self) -> Result<()> {
        let reserved = self.options.reserved_context_tokens;
        let budget = self.provider.max_context_size().saturating_sub(reserved);
        if self.context.token_count() <= budget as u64 {
            return Ok(());
        }

        self.bus.send(BusEvent::CompactionBegin { step: 0 });
        let provider = &self.provider;
        let llm: Box<LlmCallable<'_>> = Box::new(move |messages| {
            Box::pin(async move {
                let mut stream = provider.stream("", &messages, &[]).await?;
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    if let StreamChunk::ContentDelta { text: t, is_reasoning: false } = chunk? {
                        text.push_str(&t);
                    }
                }
                Ok(text)
            })
        });

        let history = self.context.history().to_vec();
        let outcome = compactor::compact_or_log(&history, &*llm, COMPACTION_TAIL_LEN).await;
        let success = outcome.is_some();
        if let Some(compacted) = outcome {
            self.context.replace_history(compacted);
            self.context.reset_after_compaction();
        }
        self.bus.send(BusEvent::CompactionEnd { step: 0, success });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn agent_loop_step(&mut self, n: u32) -> Result<StepOutcome> {
        if n > self.options.max_steps_per_run {
            return Err(Error::MaxStepsReached(self.options.max_steps_per_run));
        }
        self.bus.send(BusEvent::StepBegin { step: n });

        if self.interrupt.load(Ordering::SeqCst) {
            self.bus.send(BusEvent::StepInterrupted { step: n });
            self.synthesize_pairing_completion_if_needed()?;
            return Ok(StepOutcome::Done);
        }

        self.maybe_compact().await?;
        self.context.checkpoint(CheckpointTag::Step);

        if n == 1 {
            self.run_skill_injection()?;
        }

        let system_prompt = self.options.system_prompt.as_deref().unwrap_or("");
        let tool_names = self.registry.names();
        let schemas = self.registry.schemas(&tool_names);

        let stream_result = self
            .provider
            .stream(system_prompt, self.context.history(), &schemas)
            .await;

        let mut stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "provider call failed, ending turn with an apology");
                self.context.append(Message::assistant_text(
                    "I ran into a problem talking to the model and can't continue this turn.",
                ))?;
                return Ok(StepOutcome::Done);
            }
        };

        let mut content_buffer = String::new();
        let mut completed_calls: Vec<ToolCall> = Vec::new();
        let mut current_call = PendingToolCall::default();
        let mut has_open_call = false;
        let mut usage = None;

        while let Some(chunk) = stream.next().await {
            if self.interrupt.load(Ordering::SeqCst) {
                break;
            }
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "stream error mid-turn, ending turn with an apology");
                    self.context.append(Message::assistant_text(
                        "The response was interrupted by a connection problem.",
                    ))?;
                    return Ok(StepOutcome::Done);
                }
            };

            match chunk {
                StreamChunk::ContentDelta { text, is_reasoning } => {
                    self.bus.send(BusEvent::ContentPartMessage {
                        step: n,
                        chunk: StreamChunk::ContentDelta {
                            text: text.clone(),
                            is_reasoning,
                        },
                    });
                    if !is_reasoning {
                        content_buffer.push_str(&text);
                    }
                }
                StreamChunk::ToolCallDelta {
                    id,
                    name,
                    arguments_delta,
                } => {
                    if let Some(new_id) = &id {
                        if has_open_call && current_call.id.as_deref() != Some(new_id.as_str()) {
                            if let Some(call) = std::mem::take(&mut current_call).finish() {
                                self.bus.send(BusEvent::ToolCallMessage {
                                    step: n,
                                    call: call.clone(),
                                });
                                completed_calls.push(call);
                            }
                            current_call = PendingToolCall::default();
                        }
                        current_call.id = Some(new_id.clone());
                        has_open_call = true;
                    }
                    if let Some(name) = name {
                        current_call.name = Some(name);
                    }
                    current_call.arguments.push_str(&arguments_delta);
                }
                StreamChunk::Done { usage: u } => {
                    usage = u;
                }
            }
        }

        if has_open_call {
            if let Some(call) = current_call.finish() {
                self.bus.send(BusEvent::ToolCallMessage {
                    step: n,
                    call: call.clone(),
                });
                completed_calls.push(call);
            }
        }

        if let Some(usage) = &usage {
            self.context.update_token_count(usage.total_tokens as u64);
        }

        let mut seen_ids = std::collections::HashSet::new();
        let filtered_calls: Vec<ToolCall> = completed_calls
            .into_iter()
            .filter(|c| {
                if c.id.is_empty() || c.function_name.is_empty() {
                    debug!(id = %c.id, name = %c.function_name, "dropping malformed tool call");
                    return false;
                }
                seen_ids.insert(c.id.clone())
            })
            .collect();

        let assistant_message = if filtered_calls.is_empty() {
            Message::assistant_text(content_buffer.clone())
        } else {
            Message::assistant_with_tool_calls(
                Content::Text(content_buffer.clone()),
                filtered_calls.clone(),
            )
        };
        self.context.append(assistant_message)?;

        let had_tool_calls = !filtered_calls.is_empty();
        let consecutive = self.context.record_step_had_tool_calls(had_tool_calls);

        if !had_tool_calls {
            if !content_buffer.trim().is_empty() {
                return Ok(StepOutcome::Done);
            }
            if consecutive >= self.options.max_thinking_steps {
                info!(steps = consecutive, "thinking-loop guard forced termination");
                return Ok(StepOutcome::Done);
            }
            return Ok(StepOutcome::Continue);
        }

        let tool_messages = self.run_tool_calls(&filtered_calls).await;
        self.context.append_batch(tool_messages)?;

        Ok(StepOutcome::Continue)
    }

    async fn run_tool_calls(&mut self, calls: &[ToolCall]) -> Vec<Message> {
        let history = self.history_as_values();
        let futures = calls.iter().map(|call| {
            let registry = &self.registry;
            let hooks = &self.options.hooks;
            let history = history.clone();
            async move {
                let input = serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));

                let pre_event = PreToolUseEvent::new(
                    call.function_name.clone(),
                    input.clone(),
                    call.id.clone(),
                    history.clone(),
                );
                let pre_decision = hooks.execute_pre_tool_use(pre_event).await;

                if let Some(decision) = &pre_decision {
                    if !decision.continue_execution {
                        let reason = decision
                            .reason
                            .clone()
                            .unwrap_or_else(|| "blocked by pre_tool_use hook".to_string());
                        return (call.clone(), ToolResult::Rejected { reason });
                    }
                }

                let effective_args = pre_decision
                    .as_ref()
                    .and_then(|d| d.modified_input.as_ref())
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| call.arguments.clone());

                let result = registry
                    .execute(&call.function_name, &effective_args)
                    .await;

                let tool_result_value = match &result {
                    ToolResult::Ok { output, .. } => output.clone(),
                    ToolResult::Error { output, message } => {
                        output.clone().unwrap_or_else(|| serde_json::json!({ "error": message }))
                    }
                    ToolResult::Rejected { reason } => serde_json::json!({ "rejected": reason }),
                };
                let post_event = PostToolUseEvent::new(
                    call.function_name.clone(),
                    input,
                    call.id.clone(),
                    tool_result_value,
                    history,
                );
                hooks.execute_post_tool_use(post_event).await;

                (call.clone(), result)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut messages = Vec::with_capacity(results.len());
        for (call, mut result) in results {
            let signature = call.signature();
            if let ToolResult::Error { message, output } = &result {
                self.error_ring.push_back(signature.clone());
                if self.error_ring.len() > ERROR_RING_SIZE {
                    self.error_ring.pop_front();
                }
                let repeated = self.error_ring.len() == ERROR_RING_SIZE
                    && self.error_ring.iter().all(|s| s == &signature);
                if repeated {
                    let hint = format!(
                        "{message} (this has failed {ERROR_RING_SIZE} times in a row, try a different approach)"
                    );
                    result = ToolResult::Error {
                        output: output.clone(),
                        message: hint,
                    };
                }
            } else {
                self.error_ring.clear();
            }

            self.bus.send(BusEvent::ToolResultMessage {
                step: 0,
                call_id: call.id.clone(),
                result: ToolResultSummary::from(&result),
            });

            messages.push(Message::tool_result(&call.id, result.to_message_text()));
        }
        messages
    }

    fn run_skill_injection(&mut self) -> Result<()> {
        let Some(matcher) = &self.matcher else {
            return Ok(());
        };
        let Some(last_user) = self
            .context
            .history()
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
        else {
            return Ok(());
        };
        let user_text = last_user.content.as_text();
        let matched = matcher.match_skills(&user_text, &self.active_skill_scopes);

        let fresh: Vec<_> = matched
            .iter()
            .filter(|s| !self.context.is_skill_active(&s.name))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        if let Some(message) = crate::skills::render_injection_message(&fresh) {
            self.context.append(message)?;
            let names: Vec<String> = fresh.iter().map(|s| s.name.clone()).collect();
            for name in &names {
                self.context.mark_skill_active(name);
            }
            self.bus.send(BusEvent::SkillsActivated { step: 1, names });
        }
        Ok(())
    }

    /// On interrupt, any assistant message with unanswered tool_calls would
    /// violate the pairing invariant if left as-is; synthesize rejected tool
    /// results for the missing ones.
    fn synthesize_pairing_completion_if_needed(&mut self) -> Result<()> {
        let Some(last_assistant) = self
            .context
            .history()
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return Ok(());
        };
        let Some(calls) = self.context.history()[last_assistant].tool_calls.clone() else {
            return Ok(());
        };

        let mut answered: std::collections::HashSet<String> = std::collections::HashSet::new();
        for m in &self.context.history()[last_assistant + 1..] {
            if m.role == MessageRole::Tool {
                if let Some(id) = &m.tool_call_id {
                    answered.insert(id.clone());
                }
            }
        }

        let mut synthesized = Vec::new();
        for call in &calls {
            if !answered.contains(&call.id) {
                synthesized.push(Message::tool_result(&call.id, "Error: interrupted"));
            }
        }
        if !synthesized.is_empty() {
            self.context.append_batch(synthesized)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use crate::types::AgentOptions;

    fn base_options() -> AgentOptions {
        AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap()
    }

    #[test]
    fn pending_tool_call_requires_id_to_finish() {
        let pending = PendingToolCall {
            id: None,
            name: Some("x".into()),
            arguments: "{}".into(),
        };
        assert!(pending.finish().is_none());
    }

    #[test]
    fn pending_tool_call_finishes_with_id() {
        let pending = PendingToolCall {
            id: Some("call_1".into()),
            name: Some("x".into()),
            arguments: "{}".into(),
        };
        let call = pending.finish().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.function_name, "x");
    }

    #[tokio::test]
    async fn executor_constructs_with_empty_registry() {
        let options = base_options();
        let registry = ToolRegistry::new(Arc::new(AutoApprove));
        let executor = Executor::new(options, registry);
        assert!(executor.is_ok());
    }

    #[tokio::test]
    async fn pre_tool_use_hook_blocks_execution() {
        use crate::hooks::Hooks;

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let tool = crate::tools::tool("dangerous", "does something dangerous")
            .build(move |_args| {
                let ran = ran_clone.clone();
                Box::pin(async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(serde_json::json!({"ok": true}))
                })
            });
        let mut registry = ToolRegistry::new(Arc::new(AutoApprove));
        registry.register(Arc::new(tool));

        let hooks = Hooks::new().add_pre_tool_use(|event| async move {
            if event.tool_name == "dangerous" {
                return Some(crate::hooks::HookDecision::block("blocked by policy"));
            }
            None
        });
        let options = AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .hooks(hooks)
            .build()
            .unwrap();

        let mut executor = Executor::new(options, registry).unwrap();
        let calls = vec![ToolCall {
            id: "call_1".to_string(),
            function_name: "dangerous".to_string(),
            arguments: "{}".to_string(),
        }];
        let messages = executor.run_tool_calls(&calls).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.as_text().contains("blocked by policy"));
    }

    #[tokio::test]
    async fn post_tool_use_hook_observes_result() {
        use crate::hooks::Hooks;
        use std::sync::Mutex;

        let tool = crate::tools::tool("add", "adds numbers")
            .param("x", "int")
            .param("y", "int")
            .build(|args| {
                Box::pin(async move {
                    let x = args["x"].as_i64().unwrap_or(0);
                    let y = args["y"].as_i64().unwrap_or(0);
                    Ok(serde_json::json!(x + y))
                })
            });
        let mut registry = ToolRegistry::new(Arc::new(AutoApprove));
        registry.register(Arc::new(tool));

        let observed = Arc::new(Mutex::new(None));
        let observed_clone = observed.clone();
        let hooks = Hooks::new().add_post_tool_use(move |event| {
            let observed = observed_clone.clone();
            async move {
                *observed.lock().unwrap() = Some(event.tool_result);
                None
            }
        });
        let options = AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .hooks(hooks)
            .build()
            .unwrap();

        let mut executor = Executor::new(options, registry).unwrap();
        let calls = vec![ToolCall {
            id: "call_1".to_string(),
            function_name: "add".to_string(),
            arguments: r#"{"x":2,"y":3}"#.to_string(),
        }];
        executor.run_tool_calls(&calls).await;

        let result = observed.lock().unwrap().clone();
        assert_eq!(result, Some(serde_json::json!(5)));
    }
}
