//! Tool Registry (C3): name→tool lookup, JSON-schema export, and dispatch
//! through the normalizer and the approval interface.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::approval::{ApprovalDecision, ApprovalSource};
use crate::normalizer;
use crate::tools::Tool;
use crate::types::ToolResult;

/// Contributes a batch of tools at startup. Providers are applied in
/// ascending `order`, so a later provider can shadow (re-register) a name
/// registered by an earlier one.
pub trait ToolProvider {
    fn order(&self) -> i32 {
        0
    }
    fn tools(&self) -> Vec<Arc<Tool>>;
}

pub struct StaticToolProvider {
    order: i32,
    tools: Vec<Arc<Tool>>,
}

impl StaticToolProvider {
    pub fn new(order: i32, tools: Vec<Arc<Tool>>) -> Self {
        Self { order, tools }
    }
}

impl ToolProvider for StaticToolProvider {
    fn order(&self) -> i32 {
        self.order
    }

    fn tools(&self) -> Vec<Arc<Tool>> {
        self.tools.clone()
    }
}

/// Name→tool mapping, with schema export and approval-gated dispatch.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
    approval: Arc<dyn ApprovalSource>,
}

impl ToolRegistry {
    pub fn new(approval: Arc<dyn ApprovalSource>) -> Self {
        Self {
            tools: HashMap::new(),
            approval,
        }
    }

    /// Register a single tool by its name, overwriting any prior tool with
    /// the same name.
    pub fn register(&mut self, tool: Arc<Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Apply a list of providers in ascending `order`.
    pub fn register_providers(&mut self, mut providers: Vec<Box<dyn ToolProvider>>) {
        providers.sort_by_key(|p| p.order());
        for provider in providers {
            for tool in provider.tools() {
                self.register(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// JSON schemas (OpenAI function-calling format) for the named tools.
    /// Unknown names are silently skipped.
    pub fn schemas(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.to_openai_format())
            .collect()
    }

    /// Parameter names in schema-declared order, used by the normalizer's
    /// array-to-object repair step. Relies on `serde_json`'s `preserve_order`
    /// feature (enabled in `Cargo.toml`) so `properties`' key order matches
    /// the order the schema was built in, rather than alphabetical order.
    fn param_order(tool: &Tool) -> Vec<String> {
        tool.input_schema()
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatch a single call by name: lookup, normalize, deserialize,
    /// approve, execute. Never returns an `Err` — failures become
    /// `ToolResult::Error`/`Rejected` so the caller always has a result to
    /// turn into a tool-role message.
    pub async fn execute(&self, name: &str, raw_arguments: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "tool not found");
            return ToolResult::Error {
                output: None,
                message: "tool not found".to_string(),
            };
        };

        let param_order = Self::param_order(&tool);
        let normalized = normalizer::normalize(raw_arguments, &param_order);

        let args: Value = match serde_json::from_str(&normalized) {
            Ok(v) => v,
            Err(e) => {
                debug!(tool = name, error = %e, "arguments unparseable after normalization");
                return ToolResult::Error {
                    output: None,
                    message: format!("invalid arguments: {e}"),
                };
            }
        };

        if tool.requires_approval() {
            let description = format!("run tool '{name}' with arguments {args}");
            match self.approval.request(name, &description).await {
                ApprovalDecision::Reject => {
                    return ToolResult::Rejected {
                        reason: format!("user rejected execution of '{name}'"),
                    };
                }
                ApprovalDecision::Approve | ApprovalDecision::ApproveForSession => {}
            }
        }

        match tool.execute(args).await {
            Ok(output) => ToolResult::Ok {
                message: output.to_string(),
                output,
            },
            Err(e) => ToolResult::Error {
                output: None,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use crate::tools::tool;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(AutoApprove))
    }

    #[tokio::test]
    async fn execute_missing_tool_returns_error() {
        let reg = registry();
        let result = reg.execute("nope", "{}").await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn execute_runs_registered_tool_scenario_s4() {
        let mut reg = registry();
        let add = tool("add", "add two numbers")
            .param("x", "int")
            .param("y", "int")
            .build(|args| {
                Box::pin(async move {
                    let x = args["x"].as_i64().unwrap_or(0);
                    let y = args["y"].as_i64().unwrap_or(0);
                    Ok(json!(x + y))
                })
            });
        reg.register(Arc::new(add));

        // Malformed, near-JSON arguments repaired by the normalizer.
        let result = reg.execute("add", "x: 1, y: 2").await;
        match result {
            ToolResult::Ok { output, .. } => assert_eq!(output, json!(3)),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approval_rejection_blocks_execution() {
        struct AlwaysReject;
        #[async_trait::async_trait]
        impl crate::approval::ApprovalSource for AlwaysReject {
            async fn request(
                &self,
                _action_kind: &str,
                _description: &str,
            ) -> ApprovalDecision {
                ApprovalDecision::Reject
            }
        }

        let mut reg = ToolRegistry::new(Arc::new(AlwaysReject));
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let write_file = tool("write_file", "write a file")
            .param("path", "string")
            .build(move |_args| {
                let ran = ran_clone.clone();
                Box::pin(async move {
                    ran.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!({"status": "written"}))
                })
            })
            .requires_approval(true);
        reg.register(Arc::new(write_file));

        let result = reg.execute("write_file", r#"{"path":"/x"}"#).await;
        assert!(matches!(result, ToolResult::Rejected { .. }));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn positional_array_maps_by_declared_not_alphabetical_order() {
        let mut reg = registry();
        // Declared order is "days" then "city" — alphabetical order would be
        // the reverse, so this fails if param_order falls back to sorted keys.
        let forecast = tool("forecast", "weather forecast")
            .param("days", "int")
            .param("city", "string")
            .build(|args| {
                Box::pin(async move {
                    Ok(json!({"days": args["days"], "city": args["city"]}))
                })
            });
        reg.register(Arc::new(forecast));

        let result = reg.execute("forecast", "3, \"paris\"").await;
        match result {
            ToolResult::Ok { output, .. } => {
                assert_eq!(output["days"], json!(3));
                assert_eq!(output["city"], json!("paris"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_error_renders_message_text() {
        let err = ToolResult::Error {
            output: None,
            message: "boom".to_string(),
        };
        assert!(err.to_message_text().starts_with("Error: boom"));
    }
}
