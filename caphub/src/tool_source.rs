//! Tool seam: handlers call named tools without knowing the transport.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, HubError, HubResult};

/// Advertised tool: name, description, JSON-schema parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Source of callable tools (MCP session, HTTP adapter, in-process…).
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list(&self) -> HubResult<Vec<ToolSpec>>;
    async fn call(&self, name: &str, args: &Value) -> HubResult<Value>;
}

/// Canned tool source for tests: fixed responses by tool name.
#[derive(Default)]
pub struct MockToolSource {
    responses: HashMap<String, Value>,
}

impl MockToolSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, response: Value) -> Self {
        self.responses.insert(name.into(), response);
        self
    }
}

#[async_trait]
impl ToolSource for MockToolSource {
    async fn list(&self) -> HubResult<Vec<ToolSpec>> {
        Ok(self
            .responses
            .keys()
            .map(|name| ToolSpec {
                name: name.clone(),
                description: format!("mock tool {name}"),
                parameters: Value::Null,
            })
            .collect())
    }

    async fn call(&self, name: &str, _args: &Value) -> HubResult<Value> {
        self.responses.get(name).cloned().ok_or_else(|| {
            HubError::new(ErrorCode::ValidInput, format!("unknown tool: {name}"))
                .with_context("tool", name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_lists_and_calls() {
        let tools = MockToolSource::new().with_tool("search", json!({"hits": 3}));
        let listed = tools.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "search");
        let out = tools.call("search", &json!({"q": "x"})).await.unwrap();
        assert_eq!(out["hits"], 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid() {
        let tools = MockToolSource::new();
        let err = tools.call("nope", &Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidInput);
    }
}
