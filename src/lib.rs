//! # agentcore
//!
//! Core execution engine for a streaming, tool-using command-line AI agent
//! talking to local OpenAI-compatible servers (LM Studio, Ollama, llama.cpp,
//! vLLM, and friends).
//!
//! ## Key Features
//!
//! - **Streaming-first**: token-by-token `StreamChunk`s, not buffer-then-return
//! - **Tool calling**: JSON-schema tools with approval gating and argument repair
//! - **Context management**: pairing-invariant history, checkpoints, compaction
//! - **Skills**: Markdown+YAML skill files matched against user input and injected
//! - **Observability**: a broadcast bus of lifecycle events, `tracing` throughout
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentcore::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let registry = ToolRegistry::new(std::sync::Arc::new(AutoApprove));
//!     let mut executor = Executor::new(options, registry)?;
//!     executor.execute("What's the capital of France?").await?;
//!
//!     for message in executor.history() {
//!         println!("{:?}: {}", message.role, message.content.as_text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Each module corresponds to one stage of the agent loop:
//!
//! - **provider**: C1, the OpenAI-compatible wire adapter and streaming aggregator
//! - **normalizer**: C2, deterministic repair of near-JSON tool arguments
//! - **registry**: C3, tool lookup, schema export, and approval-gated dispatch
//! - **context**: C4, append-only history with the pairing invariant and checkpoints
//! - **compactor**: C5, LLM-assisted history summarization when the budget is tight
//! - **skills**: C6, skill file loading, scoring, and Markdown injection
//! - **executor**: C7, the bounded loop that drives the above
//! - **tools**: tool definition and JSON schema generation
//! - **approval**: the approval-source trait and its built-in implementations
//! - **hooks**: lifecycle hooks for pre/post tool use and prompt submission
//! - **config**: provider endpoint resolution, agent-spec YAML, prompt templating
//! - **error**: the crate-wide error type
//! - **bus**: the broadcast channel of executor lifecycle events
//! - **retry**: exponential backoff helpers for transient provider failures

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Approval interface for tools that require a human or policy decision
/// before running.
mod approval;

/// The message bus: a broadcast channel of executor lifecycle events.
mod bus;

/// Compactor (C5): summarizes history that has outgrown the context budget.
mod compactor;

/// Provider configuration, agent-spec YAML, and system-prompt templating.
mod config;

/// Context Store (C4): append-only history, checkpoints, and token tracking.
mod context;

/// The crate-wide error type and `Result` alias.
mod error;

/// Agent Executor (C7): the bounded loop that drives a turn to completion.
mod executor;

/// Lifecycle hooks for pre/post tool use and user-prompt submission.
mod hooks;

/// Deterministic repair of near-JSON tool-call arguments (C2).
mod normalizer;

/// Provider Adapter (C1): OpenAI-compatible wire format and stream aggregation.
mod provider;

/// Tool Registry (C3): name lookup, schema export, and dispatch.
mod registry;

/// Skill Matcher/Injector (C6): skill file loading, scoring, and rendering.
mod skills;

/// Tool definition and execution system with JSON schema generation.
mod tools;

/// Core data types: messages, content, tool calls, and agent options.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter.
pub mod retry;

pub use approval::{ApprovalDecision, ApprovalSource, AutoApprove, SessionApproval};

pub use bus::{Bus, BusEvent, ToolResultSummary, DEFAULT_CAPACITY};

pub use compactor::{compact, compact_or_log, LlmCallable};

pub use config::{get_base_url, get_model, render_template, AgentSpec, Provider, SubagentSpec};

pub use context::{
    estimate_tokens, is_approaching_limit, truncate_messages, ContextStore,
};

pub use error::{Error, Result};

pub use executor::Executor;

pub use hooks::{
    HookDecision, Hooks, PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT,
};

pub use registry::{StaticToolProvider, ToolProvider, ToolRegistry};

pub use skills::{load_skills_dir, parse_skill_file, render_injection_message, SkillMatcher};

pub use tools::{tool, Tool, ToolBuilder};

pub use types::{
    AgentOptions, AgentOptionsBuilder, BaseUrl, CheckpointTag, Content, ContentPart, ImageDetail,
    ImagePart, Message, MessageRole, ModelName, ReasoningPart, SkillScope, SkillSpec, StreamChunk,
    Temperature, TextPart, ToolCall, ToolResult, Usage,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types and functions, for `use agentcore::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AgentOptions, AgentOptionsBuilder, ApprovalDecision, ApprovalSource, AutoApprove, Error,
        Executor, HookDecision, Hooks, Message, MessageRole, Result, Tool, ToolRegistry,
        ToolResult, tool,
    };
}
