// Tool trait and the name -> tool registry answering discovery

use crate::protocol::{JsonRpcError, ToolSchema};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tool executor trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool schema for MCP
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments, returning its result value
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Failure of a tool handler; reported to the caller, never fatal to the connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid_arguments(message: impl fmt::Display) -> Self {
        Self::InvalidArguments(message.to_string())
    }

    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<ToolError> for JsonRpcError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArguments(_) => JsonRpcError::invalid_params(err.to_string()),
            ToolError::Failed(_) => JsonRpcError::internal_error(err.to_string()),
        }
    }
}

/// Deserialize tool arguments into a typed struct
pub fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("{}: {}", tool, e)))
}

/// Tool registry for managing available tools.
///
/// Keeps registration order; registering an existing name replaces that tool
/// in place.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool, returning the one it replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.schema().name;
        match self.index.get(&name) {
            Some(&slot) => {
                tracing::debug!(tool = %name, "Replacing registered tool");
                Some(std::mem::replace(&mut self.tools[slot], tool))
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
                None
            }
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| self.tools[slot].clone())
    }

    /// List all tool schemas in registration order
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: serde_json::Value, required: Vec<&str>) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "number",
        "description": description
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct EchoTool {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.to_string(),
                description: self.description.to_string(),
                input_schema: json_schema_object(json!({}), vec![]),
            }
        }

        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            Ok(json!({ "tool": self.description, "arguments": arguments }))
        }
    }

    fn echo(name: &'static str, description: &'static str) -> Arc<dyn Tool> {
        Arc::new(EchoTool { name, description })
    }

    #[test]
    fn test_list_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("zeta", "z"));
        registry.register(echo("alpha", "a"));
        registry.register(echo("mid", "m"));

        let names: Vec<_> = registry.list_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_register_replaces_existing_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(echo("get_weather", "first")).is_none());
        registry.register(echo("set_weather", "setter"));

        let replaced = registry.register(echo("get_weather", "second"));
        assert_eq!(replaced.unwrap().schema().description, "first");

        let schemas = registry.list_schemas();
        assert_eq!(registry.len(), 2);
        assert_eq!(schemas[0].name, "get_weather");
        assert_eq!(schemas[0].description, "second");

        let result = registry.get("get_weather").unwrap().execute(json!({})).await.unwrap();
        assert_eq!(result["tool"], json!("second"));
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_parse_arguments() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            city: String,
        }

        let args: Args = parse_arguments("get_weather", json!({"city": "Oslo"})).unwrap();
        assert_eq!(args.city, "Oslo");

        let err = parse_arguments::<Args>("get_weather", json!({"town": "Oslo"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.starts_with("get_weather")));

        let rpc: JsonRpcError = err.into();
        assert_eq!(rpc.code, JsonRpcError::INVALID_PARAMS);
    }
}
