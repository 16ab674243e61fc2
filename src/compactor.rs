//! Compactor (C5): asks the provider to summarize a history that has grown
//! past the context budget into a short replacement history.
//!
//! Compaction failure is non-fatal by design (§4.5): callers log the error
//! and continue with the uncompacted history, letting a subsequent
//! context-length error from the provider surface as an ordinary step
//! failure instead.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::types::{Message, MessageRole};

const SUMMARY_INSTRUCTION: &str = "Summarize the conversation above into a single concise \
message that preserves any decisions, open tasks, file paths, and facts a continuation would \
need. Do not address the user directly; write as a factual summary.";

/// A callable that performs one non-streaming LLM completion over a message
/// list and returns the assistant's reply text. The executor supplies this
/// as a thin wrapper over the provider adapter so the compactor stays
/// decoupled from HTTP/streaming concerns.
pub type LlmCallable<'a> =
    dyn Fn(Vec<Message>) -> Pin<Box<dyn Future<Output = crate::Result<String>> + Send + 'a>> + 'a;

/// Summarize `history` into a short replacement history: the leading system
/// message (if present) is preserved verbatim, followed by one assistant
/// message holding the summary, followed by a short verbatim tail of the
/// most recent messages so the latest user intent is not lost.
pub async fn compact(history: &[Message], llm: &LlmCallable<'_>, tail_len: usize) -> crate::Result<Vec<Message>> {
    if history.is_empty() {
        return Ok(Vec::new());
    }

    let (system_prefix, rest) = split_system_prefix(history);
    if rest.is_empty() {
        return Ok(system_prefix.to_vec());
    }

    let naive_start = rest.len().saturating_sub(tail_len);
    let tail_start = pairing_safe_split_point(rest, naive_start);
    let (to_summarize, tail) = rest.split_at(tail_start);
    if to_summarize.is_empty() {
        let mut result = system_prefix.to_vec();
        result.extend_from_slice(tail);
        return Ok(result);
    }

    let mut summarize_request = to_summarize.to_vec();
    summarize_request.push(Message::user(SUMMARY_INSTRUCTION));

    let summary_text = llm(summarize_request)
        .await
        .map_err(|e| crate::Error::CompactionFailed(e.to_string()))?;

    if summary_text.trim().is_empty() {
        return Err(crate::Error::CompactionFailed(
            "provider returned an empty summary".to_string(),
        ));
    }

    info!(
        original_messages = to_summarize.len(),
        summary_chars = summary_text.len(),
        "compacted history"
    );

    let mut result = system_prefix.to_vec();
    result.push(Message::assistant_text(summary_text));
    result.extend_from_slice(tail);
    Ok(result)
}

/// Run [`compact`], logging and swallowing failures per the non-fatal
/// compaction policy. Returns `None` when compaction failed, in which case
/// the caller should proceed with the original, uncompacted history.
pub async fn compact_or_log(
    history: &[Message],
    llm: &LlmCallable<'_>,
    tail_len: usize,
) -> Option<Vec<Message>> {
    match compact(history, llm, tail_len).await {
        Ok(compacted) => Some(compacted),
        Err(e) => {
            warn!(error = %e, "compaction failed, continuing with uncompacted history");
            None
        }
    }
}

/// Find the largest split point `<= naive_start` that does not fall inside
/// an assistant-tool_calls / tool-result pairing group, so the verbatim tail
/// never opens on an orphaned `Tool`-role message and the to-be-summarized
/// portion never ends on an assistant message with unanswered tool_calls.
///
/// `boundary_ok[k]` is true when splitting `messages` into `[..k]`/`[k..]`
/// leaves no tool_call id dangling: walk left to right, tracking the set of
/// ids opened by an assistant message and not yet closed by a matching tool
/// result. A position is a safe boundary only once that set is empty again.
fn pairing_safe_split_point(messages: &[Message], naive_start: usize) -> usize {
    let mut pending: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut boundary_ok = vec![true; messages.len() + 1];

    for (i, message) in messages.iter().enumerate() {
        boundary_ok[i] = pending.is_empty();
        match message.role {
            MessageRole::Assistant => {
                if let Some(calls) = &message.tool_calls {
                    pending.extend(calls.iter().map(|c| c.id.as_str()));
                }
            }
            MessageRole::Tool => {
                if let Some(id) = &message.tool_call_id {
                    pending.remove(id.as_str());
                }
            }
            _ => {}
        }
    }
    boundary_ok[messages.len()] = pending.is_empty();

    (0..=naive_start).rev().find(|&k| boundary_ok[k]).unwrap_or(0)
}

fn split_system_prefix(history: &[Message]) -> (&[Message], &[Message]) {
    match history.first() {
        Some(m) if m.role == crate::types::MessageRole::System => (&history[..1], &history[1..]),
        _ => (&history[..0], history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_summary(text: &'static str) -> Box<LlmCallable<'static>> {
        Box::new(move |_messages| Box::pin(async move { Ok(text.to_string()) }))
    }

    #[tokio::test]
    async fn compacts_preserving_system_and_tail() {
        let history = vec![
            Message::system("be helpful"),
            Message::user("message 1"),
            Message::assistant_text("reply 1"),
            Message::user("message 2"),
            Message::assistant_text("reply 2"),
        ];
        let llm = ok_summary("summary of the conversation");
        let result = compact(&history, &*llm, 2).await.unwrap();

        assert_eq!(result[0].role, crate::types::MessageRole::System);
        assert_eq!(result[1].role, crate::types::MessageRole::Assistant);
        assert_eq!(result[1].content.as_text(), "summary of the conversation");
        assert_eq!(result.len(), 4); // system + summary + 2 tail
    }

    #[tokio::test]
    async fn empty_history_returns_empty() {
        let llm = ok_summary("unused");
        let result = compact(&[], &*llm, 2).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn failure_is_surfaced_as_compaction_failed() {
        let llm: Box<LlmCallable<'static>> =
            Box::new(|_| Box::pin(async move { Err(crate::Error::timeout()) }));
        let history = vec![Message::user("hi"), Message::assistant_text("hello")];
        let result = compact(&history, &*llm, 1).await;
        assert!(matches!(result, Err(crate::Error::CompactionFailed(_))));
    }

    #[tokio::test]
    async fn tail_never_splits_a_tool_call_pairing() {
        use crate::types::ToolCall;

        let history = vec![
            Message::user("find the bug"),
            Message::assistant_with_tool_calls(
                crate::types::Content::Text(String::new()),
                vec![ToolCall {
                    id: "call_1".to_string(),
                    function_name: "search".to_string(),
                    arguments: "{}".to_string(),
                }],
            ),
            Message::tool_result("call_1", "found it in main.rs"),
            Message::assistant_text("it's a null check, want me to fix it?"),
        ];
        // A naive message-count cut of 2 would put [user, assistant(tool_calls)]
        // in to_summarize and [tool_result, assistant_text] in tail, orphaning
        // the tool_result. The safe split must pull the assistant(tool_calls)
        // message into the tail too.
        let llm = ok_summary("summary");
        let result = compact(&history, &*llm, 2).await.unwrap();

        let tail_roles: Vec<_> = result.iter().map(|m| m.role).collect();
        // Find the first Tool-role message and confirm the immediately
        // preceding message (if any) is an assistant with matching tool_calls,
        // never a lone summary or something mid-pairing.
        if let Some(tool_pos) = tail_roles
            .iter()
            .position(|r| *r == crate::types::MessageRole::Tool)
        {
            assert!(tool_pos > 0);
            assert_eq!(result[tool_pos - 1].role, crate::types::MessageRole::Assistant);
            assert!(result[tool_pos - 1].has_tool_calls());
        }
    }

    #[tokio::test]
    async fn compact_or_log_swallows_failure() {
        let llm: Box<LlmCallable<'static>> =
            Box::new(|_| Box::pin(async move { Err(crate::Error::timeout()) }));
        let history = vec![Message::user("hi"), Message::assistant_text("hello")];
        let result = compact_or_log(&history, &*llm, 1).await;
        assert!(result.is_none());
    }
}
