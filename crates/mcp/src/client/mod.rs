//! MCP client: drives a server over a pair of byte streams.
//!
//! [`McpClient`] owns one reader task that routes every inbound message;
//! callers on any task issue requests and wait for their correlated response.
//! [`StdioClient`] adds the child process that the streams come from.

mod correlator;
mod supervisor;

pub use correlator::{Correlator, PendingCall};
pub use supervisor::ServerProcess;

use crate::config::{ClientConfig, ServerCommand};
use crate::error::{FramingError, McpError, McpResult};
use crate::framing::{FrameReader, FrameWriter};
use crate::handshake::{ConnectionState, Handshake, HandshakeError};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, ClientCapabilities, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Message,
    ToolSchema, SUPPORTED_PROTOCOL_VERSIONS,
};
use serde_json::{json, Value};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound half, shared by callers and the reader (which answers server pings)
type SharedWriter = Arc<Mutex<Option<FrameWriter<BoxedWriter>>>>;

pub struct McpClient {
    writer: SharedWriter,
    correlator: Arc<Correlator>,
    handshake: Arc<Mutex<Handshake>>,
    reader_task: JoinHandle<()>,
    config: ClientConfig,
}

impl McpClient {
    /// Start a session over `reader`/`writer`; no messages are sent yet
    pub fn connect<R, W>(reader: R, writer: W, config: ClientConfig) -> McpResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;

        let writer: SharedWriter = Arc::new(Mutex::new(Some(FrameWriter::new(Box::new(writer) as BoxedWriter))));
        let correlator = Arc::new(Correlator::new());
        let handshake = Arc::new(Mutex::new(Handshake::new()));

        let reader_task = tokio::spawn(read_loop(
            FrameReader::with_limits(reader, &config.framing),
            writer.clone(),
            correlator.clone(),
            handshake.clone(),
        ));

        Ok(Self {
            writer,
            correlator,
            handshake,
            reader_task,
            config,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.handshake.lock().await.state()
    }

    /// Send a request and wait up to the configured timeout for its result
    pub async fn call(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.call_with_timeout(method, params, self.config.request_timeout).await
    }

    /// Send a request and wait up to `timeout`.
    ///
    /// On expiry the call is forgotten; a response arriving later is discarded.
    pub async fn call_with_timeout(&self, method: &str, params: Option<Value>, timeout: Duration) -> McpResult<Value> {
        let pending = self.correlator.register().await?;
        let id = pending.id.clone();

        tracing::debug!(%id, method, "Sending request");
        if let Err(e) = send_message(&self.writer, &JsonRpcRequest::new(id.clone(), method, params).into()).await {
            self.correlator.abandon(&id).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, pending.receiver).await {
            Ok(Ok(Ok(response))) => response.into_result().map_err(McpError::from),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(McpError::PeerUnavailable("connection dropped".to_string())),
            Err(_) => {
                self.correlator.abandon(&id).await;
                tracing::warn!(%id, method, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        tracing::debug!(method, "Sending notification");
        send_message(&self.writer, &JsonRpcNotification::new(method, params).into()).await
    }

    pub async fn ping(&self) -> McpResult<()> {
        self.call(methods::PING, None).await.map(|_| ())
    }

    /// Run the `initialize` / `notifications/initialized` handshake
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        match self.state().await {
            ConnectionState::Uninitialized => {}
            ConnectionState::Closed => return Err(handshake_error(HandshakeError::Closed)),
            _ => return Err(handshake_error(HandshakeError::AlreadyInitialized)),
        }

        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.config.client_info.clone(),
        };
        let value = self.call(methods::INITIALIZE, Some(serde_json::to_value(&params)?)).await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpError::Handshake(format!(
                "server chose unsupported protocol version {}",
                result.protocol_version
            )));
        }

        self.handshake
            .lock()
            .await
            .begin(&result.protocol_version, result.server_info.clone())
            .map_err(handshake_error)?;
        self.notify(methods::INITIALIZED, None).await?;
        self.handshake.lock().await.complete().map_err(handshake_error)?;

        tracing::info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "Connected to MCP server"
        );
        Ok(result)
    }

    pub async fn list_tools(&self) -> McpResult<Vec<ToolSchema>> {
        self.ensure_ready().await?;
        let value = self.call(methods::TOOLS_LIST, None).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    /// Invoke a tool and return the value its handler produced
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        self.ensure_ready().await?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let value = self.call(methods::TOOLS_CALL, Some(serde_json::to_value(&params)?)).await?;
        let result: CallToolResult = serde_json::from_value(value)?;

        if result.is_error {
            let message = match result.value() {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => format!("tool {} reported an error", name),
            };
            return Err(McpError::Tool(message));
        }

        Ok(result.value().unwrap_or(Value::Null))
    }

    /// Close our output stream so the server sees end of input
    pub async fn close_input(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            let mut inner = writer.into_inner();
            if let Err(e) = inner.shutdown().await {
                tracing::debug!(error = %e, "Error closing server input");
            }
        }
    }

    async fn ensure_ready(&self) -> McpResult<()> {
        self.handshake.lock().await.ensure_ready().map_err(handshake_error)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn handshake_error(err: HandshakeError) -> McpError {
    match err {
        HandshakeError::NotReady(_) => McpError::NotInitialized,
        HandshakeError::Closed => McpError::PeerUnavailable("connection closed".to_string()),
        HandshakeError::AlreadyInitialized => McpError::Handshake(err.to_string()),
    }
}

async fn send_message(writer: &SharedWriter, message: &Message) -> McpResult<()> {
    let mut guard = writer.lock().await;
    let writer = guard
        .as_mut()
        .ok_or_else(|| McpError::PeerUnavailable("client input closed".to_string()))?;
    writer.send(message).await.map_err(|e| match e {
        FramingError::Io(io) => McpError::PeerUnavailable(format!("server input closed: {}", io)),
        other => McpError::Framing(other),
    })
}

/// The single consumer of inbound messages for a connection
async fn read_loop<R>(
    mut reader: FrameReader<R>,
    writer: SharedWriter,
    correlator: Arc<Correlator>,
    handshake: Arc<Mutex<Handshake>>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match reader.receive().await {
            Ok(Some(Message::Response(response))) => {
                correlator.resolve(response).await;
            }
            Ok(Some(Message::Request(request))) => {
                let response = if request.method == methods::PING {
                    JsonRpcResponse::success(request.id, json!({}))
                } else {
                    tracing::debug!(method = %request.method, "Refusing server request");
                    JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
                };
                if let Err(e) = send_message(&writer, &response.into()).await {
                    break format!("failed to answer server request: {}", e);
                }
            }
            Ok(Some(Message::Notification(notification))) => {
                tracing::debug!(method = %notification.method, "Server notification");
            }
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    handshake.lock().await.close();
    let failed = correlator.fail_all(&reason).await;
    tracing::info!(reason = %reason, failed_calls = failed, "Connection to server ended");
}

/// A server child process plus the session running over its stdio
pub struct StdioClient {
    client: McpClient,
    process: ServerProcess,
    server: InitializeResult,
    shutdown_timeout: Duration,
}

impl StdioClient {
    /// Launch the server and complete the handshake
    pub async fn spawn(command: ServerCommand, config: ClientConfig) -> McpResult<Self> {
        config.validate()?;

        let (mut process, stdin, stdout) = ServerProcess::spawn(&command)?;
        let client = McpClient::connect(stdout, stdin, config)?;

        match client.initialize().await {
            Ok(server) => Ok(Self {
                client,
                process,
                server,
                shutdown_timeout: command.shutdown_timeout,
            }),
            Err(e) => {
                let status = process.try_status().ok().flatten();
                tracing::error!(
                    error = %e,
                    status = ?status,
                    stderr = %process.stderr_tail().join("\n"),
                    "Handshake with server failed"
                );
                client.close_input().await;
                if let Err(shutdown_err) = process.shutdown(command.shutdown_timeout).await {
                    tracing::warn!(error = %shutdown_err, "Failed to reap server");
                }
                Err(e)
            }
        }
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// What the server reported during the handshake
    pub fn server_info(&self) -> &InitializeResult {
        &self.server
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.process.stderr_tail()
    }

    /// Close the server's input and reap it
    pub async fn shutdown(self) -> McpResult<ExitStatus> {
        let Self {
            client,
            process,
            shutdown_timeout,
            ..
        } = self;

        client.close_input().await;
        let status = process.shutdown(shutdown_timeout).await;
        drop(client);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::McpServer;
    use crate::tools::{register_weather_tools, ToolRegistry};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use toolwire_core::WeatherStore;

    /// In-process server on the far end of a pipe
    fn served_client() -> (McpClient, JoinHandle<McpResult<()>>) {
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let config = ServerConfig::default();
            let mut registry = ToolRegistry::new();
            register_weather_tools(&mut registry, Arc::new(WeatherStore::new(&config.weather)));
            McpServer::new(registry, &config).serve(server_read, server_write).await
        });

        let client = McpClient::connect(client_read, client_write, ClientConfig::default()).unwrap();
        (client, server)
    }

    /// Scripted peer for exercising correlation edge cases
    struct FakeServer {
        lines: Lines<BufReader<DuplexStream>>,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, message: Value) {
            self.writer.write_all(format!("{}\n", message).as_bytes()).await.unwrap();
        }

        async fn reply(&mut self, request: &Value, result: Value) {
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result})).await;
        }

        async fn accept_handshake(&mut self) {
            let init = self.next().await;
            assert_eq!(init["method"], "initialize");
            self.reply(
                &init,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "fake", "version": "0.0.0"}
                }),
            )
            .await;
            let initialized = self.next().await;
            assert_eq!(initialized["method"], "notifications/initialized");
        }
    }

    fn fake_client() -> (McpClient, FakeServer) {
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        let client = McpClient::connect(client_read, client_write, ClientConfig::default()).unwrap();
        let fake = FakeServer {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };
        (client, fake)
    }

    #[tokio::test]
    async fn test_weather_scenario() {
        let (client, server) = served_client();

        let info = client.initialize().await.unwrap();
        assert_eq!(info.server_info.name, "toolwire");
        assert_eq!(client.state().await, ConnectionState::Ready);

        let names: Vec<_> = client.list_tools().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["get_weather", "set_weather"]);

        let copenhagen = client.call_tool("get_weather", json!({"city": "Copenhagen"})).await.unwrap();
        assert_eq!(copenhagen, json!(20.0));

        let nowhere = client.call_tool("get_weather", json!({"city": "Nowhere"})).await.unwrap();
        assert!((-5.0..=35.0).contains(&nowhere.as_f64().unwrap()));

        let ack = client.call_tool("set_weather", json!({"city": "Lagos", "temp": 31.5})).await.unwrap();
        assert_eq!(ack, json!("OK"));
        let lagos = client.call_tool("get_weather", json!({"city": " lAgOs "})).await.unwrap();
        assert_eq!(lagos, json!(31.5));

        client.close_input().await;
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tools_require_handshake() {
        let (client, _server) = served_client();

        let err = client.call_tool("get_weather", json!({"city": "Oslo"})).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized));
        assert!(matches!(client.list_tools().await, Err(McpError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_remote_errors_keep_connection_open() {
        let (client, _server) = served_client();
        client.initialize().await.unwrap();

        let err = client.call_tool("nope", json!({})).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(JsonRpcError::INVALID_PARAMS));

        let err = client.call("resources/list", None).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(JsonRpcError::METHOD_NOT_FOUND));

        client.ping().await.unwrap();
        assert!(matches!(
            client.initialize().await,
            Err(McpError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_discards_late_response() {
        let (client, mut fake) = fake_client();

        let (result, request) = tokio::join!(
            client.call_with_timeout("tools/list", None, Duration::from_millis(50)),
            fake.next()
        );
        assert!(matches!(result, Err(McpError::Timeout { ref method }) if method == "tools/list"));
        assert_eq!(client.correlator.pending_count().await, 0);

        // Late answer for the abandoned id, then a normal exchange
        fake.reply(&request, json!({"tools": []})).await;
        let (result, _) = tokio::join!(client.call("ping", None), async {
            let ping = fake.next().await;
            assert_eq!(ping["id"], json!(2));
            fake.reply(&ping, json!({})).await;
        });
        assert_eq!(result.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, mut fake) = fake_client();

        let peer = tokio::spawn(async move {
            let first = fake.next().await;
            let second = fake.next().await;
            fake.reply(&second, second["method"].clone()).await;
            fake.reply(&first, first["method"].clone()).await;
            fake
        });

        let (slow, fast) = tokio::join!(client.call("slow", None), client.call("fast", None));
        assert_eq!(slow.unwrap(), json!("slow"));
        assert_eq!(fast.unwrap(), json!("fast"));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_calls() {
        let (client, mut fake) = fake_client();

        let (result, _) = tokio::join!(client.call("tools/list", None), async move {
            fake.next().await;
            drop(fake);
        });

        assert!(matches!(result, Err(McpError::PeerUnavailable(_))));
        assert_eq!(client.state().await, ConnectionState::Closed);
        assert!(matches!(
            client.call("ping", None).await,
            Err(McpError::PeerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_write_to_closed_server_input_is_peer_unavailable() {
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (_server_write, client_read) = tokio::io::duplex(64 * 1024);
        let client = McpClient::connect(client_read, client_write, ClientConfig::default()).unwrap();

        // Server stopped reading but its output is still open
        drop(server_read);

        let err = client.call("ping", None).await.unwrap_err();
        assert!(matches!(err, McpError::PeerUnavailable(_)), "got {:?}", err);
        assert_eq!(client.correlator.pending_count().await, 0);

        let err = client.notify(methods::CANCELLED, None).await.unwrap_err();
        assert!(matches!(err, McpError::PeerUnavailable(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (client, mut fake) = fake_client();

        fake.send(json!({"jsonrpc": "2.0", "id": "s1", "method": "ping"})).await;
        fake.send(json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}})).await;
        fake.send(json!({"jsonrpc": "2.0", "id": "s2", "method": "sampling/createMessage"})).await;

        let pong = fake.next().await;
        assert_eq!(pong["id"], "s1");
        assert_eq!(pong["result"], json!({}));

        let refused = fake.next().await;
        assert_eq!(refused["id"], "s2");
        assert_eq!(refused["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);

        drop(client);
    }

    #[tokio::test]
    async fn test_notify_does_not_wait() {
        let (client, mut fake) = fake_client();

        client
            .notify(methods::CANCELLED, Some(json!({"requestId": 9})))
            .await
            .unwrap();

        let notification = fake.next().await;
        assert_eq!(notification["method"], "notifications/cancelled");
        assert!(notification.get("id").is_none());
    }

    #[tokio::test]
    async fn test_tool_error_result() {
        let (client, mut fake) = fake_client();
        let (init, _) = tokio::join!(client.initialize(), fake.accept_handshake());
        init.unwrap();

        let (result, _) = tokio::join!(client.call_tool("flaky", json!({})), async {
            let call = fake.next().await;
            assert_eq!(call["params"]["name"], "flaky");
            fake.reply(
                &call,
                json!({"content": [{"type": "text", "text": "sensor offline"}], "isError": true}),
            )
            .await;
        });

        assert!(matches!(result, Err(McpError::Tool(ref message)) if message == "sensor offline"));
    }

    #[tokio::test]
    async fn test_unsupported_server_version_is_rejected() {
        let (client, mut fake) = fake_client();

        let (result, _) = tokio::join!(client.initialize(), async {
            let init = fake.next().await;
            fake.reply(
                &init,
                json!({
                    "protocolVersion": "1999-01-01",
                    "capabilities": {},
                    "serverInfo": {"name": "old", "version": "0.1"}
                }),
            )
            .await;
        });

        assert!(matches!(result, Err(McpError::Handshake(_))));
        assert_eq!(client.state().await, ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_closed_input_rejects_calls() {
        let (client, server) = served_client();
        client.initialize().await.unwrap();

        client.close_input().await;
        server.await.unwrap().unwrap();

        assert!(matches!(
            client.call_tool("get_weather", json!({"city": "Oslo"})).await,
            Err(McpError::PeerUnavailable(_))
        ));
    }
}
