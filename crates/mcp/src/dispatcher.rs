// Routes incoming messages to the handshake and the tool registry

use crate::handshake::{ConnectionState, Handshake};
use crate::protocol::{
    methods, negotiate_protocol_version, CallToolParams, CallToolResult, Implementation,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, Message, ServerCapabilities, ToolsCapability,
};
use crate::tools::ToolRegistry;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Server-side dispatcher for a single connection.
///
/// Every request gets exactly one response; notifications and stray responses
/// never get one.
pub struct Dispatcher {
    registry: ToolRegistry,
    handshake: Handshake,
    server_info: Implementation,
    instructions: Option<String>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, server_info: Implementation) -> Self {
        Self {
            registry,
            handshake: Handshake::new(),
            server_info,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.handshake.state()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Mark the connection as gone
    pub fn close(&mut self) {
        self.handshake.close();
    }

    /// Handle one inbound message, returning the response to send, if any
    pub async fn dispatch(&mut self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Request(request) => Some(self.handle_request(request).await),
            Message::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            Message::Response(response) => {
                tracing::warn!(id = %response.id, "Discarding unexpected response from client");
                None
            }
        }
    }

    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.clone();

        match self.route(request).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                tracing::debug!(%id, method = %method, code = error.code, "Request failed: {}", error.message);
                JsonRpcResponse::error(id, error)
            }
        }
    }

    async fn route(&mut self, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
        if self.handshake.is_closed() {
            return Err(JsonRpcError::not_initialized());
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.initialize(request.params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => {
                self.handshake.ensure_ready()?;
                to_result(&ListToolsResult {
                    tools: self.registry.list_schemas(),
                })
            }
            methods::TOOLS_CALL => {
                self.handshake.ensure_ready()?;
                self.call_tool(request.params).await
            }
            other => {
                tracing::warn!(method = %other, "Unknown method");
                Err(JsonRpcError::method_not_found(other))
            }
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = parse_params(methods::INITIALIZE, params)?;
        let version = negotiate_protocol_version(&params.protocol_version);

        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            negotiated = %version,
            "Client initializing"
        );

        self.handshake.begin(version, params.client_info)?;

        to_result(&InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                experimental: None,
            },
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(methods::TOOLS_CALL, params)?;

        let tool = self
            .registry
            .get(&params.name)
            .ok_or_else(|| JsonRpcError::unknown_tool(&params.name))?;

        tracing::debug!(tool = %params.name, arguments = %params.arguments, "Calling tool");

        // A panicking handler must not take the connection down with it
        match AssertUnwindSafe(tool.execute(params.arguments)).catch_unwind().await {
            Ok(Ok(value)) => to_result(&CallToolResult::from_value(value)),
            Ok(Err(e)) => {
                tracing::warn!(tool = %params.name, error = %e, "Tool failed");
                Err(e.into())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(tool = %params.name, reason = %reason, "Tool panicked");
                Err(JsonRpcError::internal_error(format!(
                    "Tool {} panicked: {}",
                    params.name, reason
                )))
            }
        }
    }

    pub fn handle_notification(&mut self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => match self.handshake.complete() {
                Ok(()) => tracing::info!("Client initialized, connection ready"),
                Err(e) => tracing::warn!(error = %e, "Ignoring initialized notification"),
            },
            methods::CANCELLED => {
                // Calls run to completion inline; nothing to cancel
                tracing::debug!(params = ?notification.params, "Cancellation notice");
            }
            other => tracing::debug!(method = %other, "Ignoring notification"),
        }
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid {} params: {}", method, e)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn to_result(value: &impl Serialize) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
