// MCP server: the single read-dispatch-write loop over a byte stream

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::McpResult;
use crate::framing::{FrameReader, FrameWriter, FramingLimits};
use crate::handshake::ConnectionState;
use crate::tools::ToolRegistry;
use tokio::io::{AsyncRead, AsyncWrite};

pub struct McpServer {
    dispatcher: Dispatcher,
    limits: FramingLimits,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, config: &ServerConfig) -> Self {
        let mut dispatcher = Dispatcher::new(registry, config.server_info());
        if let Some(instructions) = &config.instructions {
            dispatcher = dispatcher.with_instructions(instructions.clone());
        }

        Self {
            dispatcher,
            limits: config.framing.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    /// Serve on the process's stdin/stdout
    pub async fn run_stdio(&mut self) -> McpResult<()> {
        tracing::info!("Starting MCP server on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Requests are handled one at a time in arrival order. Handler failures
    /// become error responses; only transport failures end the loop early.
    pub async fn serve<R, W>(&mut self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::with_limits(reader, &self.limits);
        let mut writer = FrameWriter::new(writer);

        tracing::info!(tools = self.dispatcher.registry().len(), "MCP server ready for connections");

        let outcome = loop {
            let message = match reader.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!("EOF received, shutting down");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Connection failed");
                    break Err(e);
                }
            };

            tracing::debug!(method = ?message.method(), id = ?message.id(), "Received message");

            if let Some(response) = self.dispatcher.dispatch(message).await {
                if let Err(e) = writer.send(&response.into()).await {
                    tracing::error!(error = %e, "Failed to write response");
                    break Err(e);
                }
            }
        };

        self.dispatcher.close();
        outcome.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FramingError, McpError};
    use crate::protocol::{Message, RequestId};
    use crate::protocol::ToolSchema;
    use crate::tools::{register_weather_tools, Tool, ToolError};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use toolwire_core::WeatherStore;

    fn server() -> McpServer {
        let config = ServerConfig::default();
        let mut registry = ToolRegistry::new();
        register_weather_tools(&mut registry, Arc::new(WeatherStore::new(&config.weather)));
        McpServer::new(registry, &config)
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl Tool for PanickingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "meltdown".to_string(),
                description: "Panics mid-call".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            panic!("handler bug");
        }
    }

    async fn run_session(input: &str) -> (Vec<Message>, ConnectionState) {
        run_session_with(server(), input).await
    }

    async fn run_session_with(mut server: McpServer, input: &str) -> (Vec<Message>, ConnectionState) {
        let (mut client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        client_write.write_all(input.as_bytes()).await.unwrap();
        drop(client_write);

        server.serve(server_read, server_write).await.unwrap();
        let state = server.state();
        drop(server);

        let mut lines = BufReader::new(client_read).lines();
        let mut messages = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            messages.push(Message::parse(&line).unwrap());
        }
        (messages, state)
    }

    fn result_of(message: &Message) -> serde_json::Value {
        match message {
            Message::Response(resp) => resp.clone().into_result().unwrap(),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_session_over_pipe() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{"roots":{"listChanged":true},"sampling":{}},"clientInfo":{"name":"test-client","version":"1.0.0"}}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
            "this is not json\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"get_weather","arguments":{"city":"Copenhagen"}}}"#, "\n",
        );

        let (messages, state) = run_session(input).await;

        // initialize, tools/list, tools/call; nothing for the notification or the garbage
        assert_eq!(messages.len(), 3);
        assert_eq!(result_of(&messages[0])["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result_of(&messages[1])["tools"][0]["name"], json!("get_weather"));
        assert_eq!(result_of(&messages[2])["structuredContent"]["result"], json!(20.0));
        assert_eq!(state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_calls_before_handshake_are_answered_with_errors() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":"early","method":"tools/call","params":{"name":"get_weather","arguments":{"city":"Oslo"}}}"#, "\n",
        );

        let (messages, _) = run_session(input).await;

        assert_eq!(messages.len(), 1);
        let Message::Response(resp) = &messages[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.id, RequestId::from("early"));
        assert_eq!(resp.clone().into_result().unwrap_err().code, -32002);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_end_loop() {
        let config = ServerConfig::default();
        let mut registry = ToolRegistry::new();
        register_weather_tools(&mut registry, Arc::new(WeatherStore::new(&config.weather)));
        registry.register(Arc::new(PanickingTool));

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test-client","version":"1.0.0"}}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"meltdown","arguments":{}}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#, "\n",
        );

        let (messages, _) = run_session_with(McpServer::new(registry, &config), input).await;

        assert_eq!(messages.len(), 3);
        let Message::Response(failed) = &messages[1] else {
            panic!("expected response");
        };
        assert_eq!(failed.id, RequestId::Number(2));
        assert_eq!(failed.clone().into_result().unwrap_err().code, -32603);
        assert_eq!(result_of(&messages[2]), json!({}));
    }

    #[tokio::test]
    async fn test_garbage_flood_ends_connection() {
        let (mut feed, server_read) = tokio::io::duplex(1024);
        let (server_write, _client_read) = tokio::io::duplex(1024);
        let feeder = tokio::spawn(async move {
            let _ = feed.write_all("x\n".repeat(40).as_bytes()).await;
        });

        let mut server = server();
        let err = server.serve(server_read, server_write).await.unwrap_err();

        assert!(matches!(err, McpError::Framing(FramingError::TooManyMalformed(32))));
        assert_eq!(server.state(), ConnectionState::Closed);
        feeder.await.unwrap();
    }
}
