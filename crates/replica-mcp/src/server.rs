//! MCP Server implementation
//!
//! Reads newline-delimited JSON-RPC 2.0 messages and writes one response
//! line per request. Each `tools/call` runs as its own task, so a long sync
//! does not hold up `sync_status`; responses go through a single writer
//! task and may come back out of order. `notifications/cancelled` aborts
//! the matching call, and end of input aborts every call still running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

use crate::Result;
use crate::handlers::Dispatcher;
use crate::protocol::{
    CancelledParams, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability,
};
use crate::tools::{ToolDefinition, ToolResult, get_tool_definitions};

/// What to do with one incoming line
enum Incoming {
    /// Answer immediately
    Reply(JsonRpcResponse),
    /// Run a tool; reply only if `id` is set
    Call { id: Option<Value>, params: Value },
    /// Abort the call with this request id
    Cancel(Value),
    /// Notification that needs no action
    Ignore,
}

type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

/// MCP server exposing the sync operations as tools
///
/// # Example
///
/// ```ignore
/// use replica_core::{Overrides, Settings};
/// use replica_mcp::{Dispatcher, ReplicaMcpServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = Settings::load(&Overrides::default())?;
///     let server = ReplicaMcpServer::new(Dispatcher::from_settings(&settings)?);
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct ReplicaMcpServer {
    dispatcher: Dispatcher,
    tools: Vec<ToolDefinition>,
}

impl ReplicaMcpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tools: get_tool_definitions(),
        }
    }

    /// Available MCP tools
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Serve over the process's stdin and stdout
    pub async fn run(&self) -> Result<()> {
        tracing::info!("MCP server ready, listening on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until `reader` reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_lines(writer, rx));

        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!(request = %line, "Received message");

                    match self.classify(line) {
                        Incoming::Reply(response) => send(&tx, &response),
                        Incoming::Ignore => {}
                        Incoming::Cancel(request_id) => cancel(&in_flight, &request_id),
                        Incoming::Call { id, params } => {
                            self.spawn_call(&mut tasks, &in_flight, &tx, id, params);
                        }
                    }
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        if !tasks.is_empty() {
            tracing::info!(calls = tasks.len(), "Input closed, aborting in-flight calls");
        }
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        drop(tx);
        match writer_task.await {
            Ok(Err(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Handle one message to completion, including tool calls.
    ///
    /// Returns the response line, or `None` for notifications.
    pub async fn handle_message(&self, message: &str) -> Option<String> {
        match self.classify(message) {
            Incoming::Reply(response) => encode(&response),
            Incoming::Call { id, params } => {
                let response = call_tool(&self.dispatcher, id.clone(), params).await;
                id.and_then(|_| encode(&response))
            }
            Incoming::Cancel(_) | Incoming::Ignore => None,
        }
    }

    fn spawn_call(
        &self,
        tasks: &mut JoinSet<()>,
        in_flight: &InFlight,
        tx: &mpsc::UnboundedSender<String>,
        id: Option<Value>,
        params: Value,
    ) {
        let key = id.as_ref().map(request_key);
        let dispatcher = self.dispatcher.clone();
        let tx = tx.clone();
        let registry = in_flight.clone();
        let task_key = key.clone();

        // Held across spawn and insert so the task cannot deregister first
        let mut guard = lock(in_flight);
        let handle = tasks.spawn(async move {
            let response = call_tool(&dispatcher, id.clone(), params).await;
            if id.is_some() {
                send(&tx, &response);
            }
            if let Some(key) = task_key {
                lock(&registry).remove(&key);
            }
        });
        if let Some(key) = key {
            guard.insert(key, handle);
        }
    }

    fn classify(&self, message: &str) -> Incoming {
        let value: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable message");
                return Incoming::Reply(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };
        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Incoming::Reply(JsonRpcResponse::error(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ));
            }
        };

        match request.method.as_str() {
            "initialize" => Incoming::Reply(self.initialize_response(request.id)),
            "initialized" | "notifications/initialized" => Incoming::Ignore,
            "notifications/cancelled" => {
                match serde_json::from_value::<CancelledParams>(request.params) {
                    Ok(params) => {
                        tracing::info!(
                            request_id = %params.request_id,
                            reason = params.reason.as_deref().unwrap_or(""),
                            "Cancellation requested"
                        );
                        Incoming::Cancel(params.request_id)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed cancellation");
                        Incoming::Ignore
                    }
                }
            }
            "ping" => Incoming::Reply(JsonRpcResponse::success(request.id, json!({}))),
            "tools/list" => Incoming::Reply(JsonRpcResponse::success(
                request.id,
                json!({ "tools": self.tools }),
            )),
            "tools/call" => Incoming::Call {
                id: request.id,
                params: request.params,
            },
            method if request.id.is_none() => {
                tracing::debug!(method, "Ignoring notification");
                Incoming::Ignore
            }
            method => Incoming::Reply(JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        }
    }

    fn initialize_response(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "replica-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
        }
    }
}

/// Run one `tools/call` and wrap its outcome as a tool result
async fn call_tool(dispatcher: &Dispatcher, id: Option<Value>, params: Value) -> JsonRpcResponse {
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e));
        }
    };

    let tool_result = match dispatcher.dispatch(&params.name, params.arguments).await {
        Ok(payload) => serde_json::to_string_pretty(&payload).map(ToolResult::text),
        Err(err) => {
            tracing::info!(tool = %params.name, kind = %err.kind, error = %err.message, "Tool call failed");
            serde_json::to_string_pretty(&err.to_value()).map(ToolResult::error)
        }
    };

    match tool_result.and_then(serde_json::to_value) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    if let Some(line) = encode(response) {
        // The writer only stops once stdout is gone
        let _ = tx.send(line);
    }
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response");
            None
        }
    }
}

fn cancel(in_flight: &InFlight, request_id: &Value) {
    match lock(in_flight).remove(&request_key(request_id)) {
        Some(handle) => {
            handle.abort();
            tracing::info!(request_id = %request_id, "Aborted in-flight call");
        }
        None => tracing::debug!(request_id = %request_id, "Nothing to cancel"),
    }
}

/// Ids `7` and `"7"` are different requests
fn request_key(id: &Value) -> String {
    id.to_string()
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
