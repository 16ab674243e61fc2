//! Context Store (C4): an append-only conversation history with a monotonic
//! checkpoint list, a running token counter, and an optional NDJSON
//! crash-recovery log. Also hosts the lower-level token-estimation helpers
//! callers can use without going through the store at all.
//!
//! Thread-safety contract: operations are serialized with respect to the
//! agent loop (the loop is single-threaded per agent); concurrent use from
//! multiple agents requires one `ContextStore` per agent.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;

use tracing::debug;

use crate::types::{Checkpoint, CheckpointTag, Content, ContentPart, Message, MessageRole};

// ============================================================================
// TOKEN ESTIMATION (manual, opt-in utilities)
// ============================================================================

/// Estimate token count for a message list using a character-based
/// approximation (1 token ≈ 4 characters). This is a conservative estimate
/// that works across model families without a tokenizer dependency; always
/// include a 10-20% safety margin when checking limits.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;
    for message in messages {
        total_chars += 8; // role formatting overhead
        total_chars += content_chars(&message.content);
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                total_chars += call.function_name.len() + call.id.len() + call.arguments.len();
            }
        }
        if let Some(id) = &message.tool_call_id {
            total_chars += id.len();
        }
    }
    total_chars += 16; // conversation-level overhead
    total_chars.div_ceil(4)
}

fn content_chars(content: &Content) -> usize {
    match content {
        Content::Text(s) => s.len(),
        Content::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text(t) => t.text.len(),
                ContentPart::Reasoning(r) => r.text.len(),
                ContentPart::Image(i) => i.url.len(),
            })
            .sum(),
    }
}

/// Keep the most recent `keep` messages, always preserving a leading system
/// message when `preserve_system` is set. A simple truncation: it does not
/// attempt to preserve tool-call pairing across the cut.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }
    if messages.len() <= keep {
        return messages.to_vec();
    }

    let has_system = preserve_system && messages[0].role == MessageRole::System;
    if has_system {
        let mut result = vec![messages[0].clone()];
        if keep > 0 && messages.len() > 1 {
            let start = messages.len().saturating_sub(keep);
            result.extend_from_slice(&messages[start.max(1)..]);
        }
        result
    } else if keep > 0 {
        let start = messages.len().saturating_sub(keep);
        messages[start..].to_vec()
    } else {
        Vec::new()
    }
}

/// Convenience check combining estimation with a margin threshold.
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}

// ============================================================================
// CONTEXT STORE
// ============================================================================

/// Append-only log of [`Message`]s plus a monotonic checkpoint list and a
/// running token counter.
pub struct ContextStore {
    history: Vec<Message>,
    checkpoints: Vec<Checkpoint>,
    next_checkpoint_id: u64,
    token_count: u64,
    /// Skills already injected this session (invariant 5: skill idempotence).
    active_skills: HashSet<String>,
    consecutive_no_tool_calls: u32,
    persistence_path: Option<PathBuf>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            checkpoints: Vec::new(),
            next_checkpoint_id: 0,
            token_count: 0,
            active_skills: HashSet::new(),
            consecutive_no_tool_calls: 0,
            persistence_path: None,
        }
    }

    /// Enable NDJSON crash-recovery persistence at `path`. Existing content,
    /// if any, is left untouched; new appends are written after it.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_path = Some(path.into());
        self
    }

    /// Append one message. Rejects an append that would violate the
    /// assistant/tool pairing invariant (§3, §8 invariant 1): a tool-role
    /// message whose `tool_call_id` does not match a pending call from the
    /// most recent assistant message.
    pub fn append(&mut self, message: Message) -> crate::Result<()> {
        self.check_pairing_for_append(std::slice::from_ref(&message))?;
        self.persist(std::slice::from_ref(&message))?;
        self.history.push(message);
        Ok(())
    }

    /// Append a batch atomically (all together, in any order relative to
    /// each other, but all-or-nothing with respect to the pairing check).
    pub fn append_batch(&mut self, messages: Vec<Message>) -> crate::Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.check_pairing_for_append(&messages)?;
        self.persist(&messages)?;
        self.history.extend(messages);
        Ok(())
    }

    fn check_pairing_for_append(&self, incoming: &[Message]) -> crate::Result<()> {
        // Find pending tool_call ids opened by the last assistant message
        // that hasn't been fully answered yet.
        let mut pending = self.pending_tool_call_ids();
        for m in incoming {
            match m.role {
                MessageRole::Tool => {
                    let Some(id) = &m.tool_call_id else {
                        return Err(crate::Error::invalid_input(
                            "tool-role message missing tool_call_id",
                        ));
                    };
                    if !pending.remove(id) {
                        return Err(crate::Error::invalid_input(format!(
                            "orphan tool message for id '{id}': no matching pending tool_call"
                        )));
                    }
                }
                MessageRole::Assistant => {
                    if !pending.is_empty() {
                        return Err(crate::Error::invalid_input(
                            "assistant message appended while prior tool_calls are unanswered",
                        ));
                    }
                    if let Some(calls) = &m.tool_calls {
                        pending = calls.iter().map(|c| c.id.clone()).collect();
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn pending_tool_call_ids(&self) -> HashSet<String> {
        let Some(last_assistant_idx) = self
            .history
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return HashSet::new();
        };
        let Some(calls) = &self.history[last_assistant_idx].tool_calls else {
            return HashSet::new();
        };
        let mut pending: HashSet<String> = calls.iter().map(|c| c.id.clone()).collect();
        for m in &self.history[last_assistant_idx + 1..] {
            if m.role == MessageRole::Tool {
                if let Some(id) = &m.tool_call_id {
                    pending.remove(id);
                }
            }
        }
        pending
    }

    fn persist(&self, messages: &[Message]) -> crate::Result<()> {
        let Some(path) = &self.persistence_path else {
            debug!("context persistence disabled, skipping NDJSON write");
            return Ok(());
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for m in messages {
            let line = serde_json::to_string(m)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Read-only snapshot of the current history.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Replace the entire history wholesale, bypassing the pairing-invariant
    /// check on `append`. Used only after compaction, where the replacement
    /// is itself pairing-safe by construction (system prefix + summary +
    /// verbatim tail). Callers must follow this with [`reset_after_compaction`]
    /// to re-baseline checkpoint 0.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.history = messages;
    }

    /// Record a checkpoint at the current history length.
    pub fn checkpoint(&mut self, tag: CheckpointTag) -> u64 {
        let id = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;
        self.checkpoints.push(Checkpoint {
            id,
            history_len: self.history.len(),
            tag,
        });
        id
    }

    /// Create checkpoint 0 if it has not already been created.
    pub fn ensure_initial_checkpoint(&mut self) {
        if self.checkpoints.is_empty() {
            self.checkpoint(CheckpointTag::Initial);
        }
    }

    /// Truncate history back to the length recorded at `checkpoint_id`,
    /// discarding later checkpoints. Invariant 2: checkpoint ids are
    /// strictly increasing and this leaves `history.len()` equal to the
    /// recorded length.
    pub fn revert_to(&mut self, checkpoint_id: u64) -> crate::Result<()> {
        let Some(pos) = self.checkpoints.iter().position(|c| c.id == checkpoint_id) else {
            return Err(crate::Error::invalid_input(format!(
                "no checkpoint with id {checkpoint_id}"
            )));
        };
        let len = self.checkpoints[pos].history_len;
        self.history.truncate(len);
        self.checkpoints.truncate(pos + 1);
        Ok(())
    }

    pub fn update_token_count(&mut self, n: u64) {
        self.token_count = n;
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// Whether `skill_name` has already been injected this session
    /// (invariant 5). Records it as active if not.
    pub fn mark_skill_active(&mut self, skill_name: &str) -> bool {
        self.active_skills.insert(skill_name.to_string())
    }

    pub fn is_skill_active(&self, skill_name: &str) -> bool {
        self.active_skills.contains(skill_name)
    }

    /// Reset compaction-invalidated state: checkpoints past 0, and active
    /// skills (a compacted history no longer literally contains the
    /// injected skill message, so it is allowed to be re-injected).
    pub fn reset_after_compaction(&mut self) {
        self.checkpoints.retain(|c| c.tag == CheckpointTag::Initial);
        self.active_skills.clear();
        if self.checkpoints.is_empty() {
            self.checkpoint(CheckpointTag::Initial);
        } else if let Some(c0) = self.checkpoints.first_mut() {
            c0.history_len = self.history.len();
        }
    }

    /// Consecutive-no-tool-calls counter used by the thinking-loop guard
    /// (§4.7 step 11). Per the open question in §9, this counter does NOT
    /// reset across compactions.
    pub fn record_step_had_tool_calls(&mut self, had_tool_calls: bool) -> u32 {
        if had_tool_calls {
            self.consecutive_no_tool_calls = 0;
        } else {
            self.consecutive_no_tool_calls += 1;
        }
        self.consecutive_no_tool_calls
    }

    pub fn consecutive_no_tool_calls(&self) -> u32 {
        self.consecutive_no_tool_calls
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}
