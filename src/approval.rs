//! The tool-approval interface (§6): gates a `requires_approval` tool behind
//! a user decision before the registry runs it.

use std::collections::HashSet;
use std::sync::Mutex;

/// A user's response to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    ApproveForSession,
    Reject,
}

/// Anything that can answer `request(action_kind, description)`. Real
/// front-ends implement this over a terminal prompt or a UI dialog; tests
/// and "yolo mode" use the provided implementations below.
#[async_trait::async_trait]
pub trait ApprovalSource: Send + Sync {
    async fn request(&self, action_kind: &str, description: &str) -> ApprovalDecision;
}

/// Short-circuits every request to `Approve` ("YOLO mode").
pub struct AutoApprove;

#[async_trait::async_trait]
impl ApprovalSource for AutoApprove {
    async fn request(&self, _action_kind: &str, _description: &str) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

/// Wraps an inner source with a session-level memory of `ApproveForSession`
/// kinds, so the same action kind is auto-approved for the rest of the run.
pub struct SessionApproval<S: ApprovalSource> {
    inner: S,
    approved_kinds: Mutex<HashSet<String>>,
}

impl<S: ApprovalSource> SessionApproval<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            approved_kinds: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait::async_trait]
impl<S: ApprovalSource> ApprovalSource for SessionApproval<S> {
    async fn request(&self, action_kind: &str, description: &str) -> ApprovalDecision {
        if self
            .approved_kinds
            .lock()
            .expect("approval session lock poisoned")
            .contains(action_kind)
        {
            return ApprovalDecision::Approve;
        }

        let decision = self.inner.request(action_kind, description).await;
        if decision == ApprovalDecision::ApproveForSession {
            self.approved_kinds
                .lock()
                .expect("approval session lock poisoned")
                .insert(action_kind.to_string());
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysReject;

    #[async_trait::async_trait]
    impl ApprovalSource for AlwaysReject {
        async fn request(&self, _action_kind: &str, _description: &str) -> ApprovalDecision {
            ApprovalDecision::Reject
        }
    }

    struct ApproveOnce {
        decision: ApprovalDecision,
    }

    #[async_trait::async_trait]
    impl ApprovalSource for ApproveOnce {
        async fn request(&self, _action_kind: &str, _description: &str) -> ApprovalDecision {
            self.decision
        }
    }

    #[tokio::test]
    async fn auto_approve_always_approves() {
        let src = AutoApprove;
        assert_eq!(
            src.request("write_file", "write foo.txt").await,
            ApprovalDecision::Approve
        );
    }

    #[tokio::test]
    async fn reject_passes_through() {
        let src = AlwaysReject;
        assert_eq!(
            src.request("write_file", "write foo.txt").await,
            ApprovalDecision::Reject
        );
    }

    #[tokio::test]
    async fn session_approval_remembers_kind() {
        let src = SessionApproval::new(ApproveOnce {
            decision: ApprovalDecision::ApproveForSession,
        });
        assert_eq!(
            src.request("write_file", "first").await,
            ApprovalDecision::ApproveForSession
        );
        // Switch inner to reject everything; session cache should still win.
        assert!(src.approved_kinds.lock().unwrap().contains("write_file"));
        assert_eq!(
            src.request("write_file", "second").await,
            ApprovalDecision::Approve
        );
    }
}
