//! Integration tests verifying that the context store, tool registry, skill
//! matcher, and config loader work together correctly.

use std::sync::Arc;

use agentcore::{
    AgentOptions, ApprovalDecision, ApprovalSource, AutoApprove, ToolRegistry, estimate_tokens,
    is_approaching_limit, tool, truncate_messages,
};

#[test]
fn agent_options_with_tools_builds() {
    let calculator = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(serde_json::json!({"result": a + b}))
            })
        });

    let options = AgentOptions::builder()
        .system_prompt("You are a calculator assistant")
        .model("test-model")
        .base_url("http://localhost:1234/v1")
        .tool(Arc::new(calculator))
        .build()
        .unwrap();

    assert_eq!(options.tools.len(), 1);
    assert_eq!(options.tools[0].name(), "add");
}

#[test]
fn builder_pattern_chain_sets_temperature() {
    let options = AgentOptions::builder()
        .system_prompt("Test")
        .model("model")
        .base_url("http://localhost:1234/v1")
        .temperature(0.7)
        .build()
        .unwrap();

    assert_eq!(options.temperature.value(), 0.7);
}

#[test]
fn context_management_integration() {
    use agentcore::Message;

    let messages = vec![
        Message::system("System prompt"),
        Message::user("User message 1"),
        Message::assistant_text("Response 1"),
        Message::user("User message 2"),
    ];

    let tokens = estimate_tokens(&messages);
    assert!(tokens > 0);

    let truncated = truncate_messages(&messages, 2, true);
    assert_eq!(truncated.len(), 3); // system + last 2

    assert!(!is_approaching_limit(&messages, 1000, 0.8));
}

#[test]
fn retry_config_integration() {
    use agentcore::retry::RetryConfig;
    use std::time::Duration;

    let config = RetryConfig::new()
        .with_max_attempts(5)
        .with_initial_delay(Duration::from_millis(100))
        .with_backoff_multiplier(1.5);

    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.initial_delay, Duration::from_millis(100));
    assert_eq!(config.backoff_multiplier, 1.5);
}

#[tokio::test]
async fn tool_registry_dispatches_through_normalizer_and_approval() {
    let mut registry = ToolRegistry::new(Arc::new(AutoApprove));
    let multiply = tool("multiply", "Multiply two numbers")
        .param("x", "number")
        .param("y", "number")
        .build(|args| {
            Box::pin(async move {
                let x = args["x"].as_f64().unwrap_or(0.0);
                let y = args["y"].as_f64().unwrap_or(0.0);
                Ok(serde_json::json!({"result": x * y}))
            })
        });
    registry.register(Arc::new(multiply));

    // Slightly malformed arguments: the normalizer should repair this into
    // valid JSON before dispatch.
    let result = registry.execute("multiply", "x: 5, y: 3").await;
    match result {
        agentcore::ToolResult::Ok { output, .. } => assert_eq!(output["result"], 15.0),
        other => panic!("expected Ok, got {other:?}"),
    }
}

#[tokio::test]
async fn approval_rejection_is_reported_without_running_the_tool() {
    struct AlwaysReject;
    #[async_trait::async_trait]
    impl ApprovalSource for AlwaysReject {
        async fn request(&self, _action_kind: &str, _description: &str) -> ApprovalDecision {
            ApprovalDecision::Reject
        }
    }

    let mut registry = ToolRegistry::new(Arc::new(AlwaysReject));
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran_clone = ran.clone();
    let delete_file = tool("delete_file", "Delete a file")
        .param("path", "string")
        .build(move |_args| {
            let ran = ran_clone.clone();
            Box::pin(async move {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::json!({"status": "deleted"}))
            })
        })
        .requires_approval(true);
    registry.register(Arc::new(delete_file));

    let result = registry
        .execute("delete_file", r#"{"path":"/etc/passwd"}"#)
        .await;
    assert!(matches!(result, agentcore::ToolResult::Rejected { .. }));
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn error_handling_integration() {
    use agentcore::{Error, Result};

    fn operation_that_fails() -> Result<()> {
        Err(Error::timeout())
    }

    fn operation_that_succeeds() -> Result<i32> {
        Ok(42)
    }

    assert!(operation_that_fails().is_err());
    assert_eq!(operation_that_succeeds().unwrap(), 42);
}
