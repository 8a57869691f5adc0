//! MCP server process pool.
//!
//! Owns OS subprocess creation, the initialize/tools-discovery handshake,
//! and the low-level request/response exchange over the child's pipes. The
//! pool is an explicitly constructed, injectable service; there is no
//! global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use toolbridge_core::{ProcessStatus, ServerConfiguration, ServerType, StdioLaunch, Tool};
use uuid::Uuid;

use crate::path;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, request};
use crate::validator;

/// Fixed read timeout for one response line.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP protocol revision sent during initialize.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Non-JSON lines tolerated on stdout before one exchange gives up
/// (npx and friends print banners during startup).
const MAX_SKIPPED_LINES: usize = 10;

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("i/o error on child pipes: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out after {0:?} waiting for server response")]
    Timeout(Duration),

    #[error("response id does not match request id: sent {sent}, received {received}")]
    IdMismatch { sent: String, received: String },

    #[error("server closed its stdout")]
    ClosedStream,

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Composite identity of one logical bridged connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub user_id: i64,
    pub configuration_id: i64,
}

impl ProcessKey {
    #[must_use]
    pub const fn new(user_id: i64, configuration_id: i64) -> Self {
        Self {
            user_id,
            configuration_id,
        }
    }
}

/// Captured stdio of a running child. Guarded by one async mutex: the wire
/// protocol is strictly one-request-then-one-response, so concurrent calls
/// against the same process must queue here.
#[derive(Debug)]
struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    _stderr: ChildStderr,
}

/// A pooled MCP server process and its cached discovery state.
#[derive(Debug)]
pub struct ManagedProcess {
    /// Pool-internal id of this instance.
    pub id: Uuid,
    /// Configuration this process was launched from.
    pub configuration_id: i64,
    /// User the process is pooled for.
    pub user_id: i64,
    /// OS process id, when the child reported one.
    pub pid: Option<u32>,

    status: Mutex<ProcessStatus>,
    tools: Mutex<Vec<Tool>>,
    last_activity: Mutex<DateTime<Utc>>,
    pipes: Mutex<Pipes>,
    child: Mutex<Child>,
}

impl ManagedProcess {
    /// Current status.
    pub async fn status(&self) -> ProcessStatus {
        *self.status.lock().await
    }

    pub(crate) async fn set_status(&self, status: ProcessStatus) {
        *self.status.lock().await = status;
    }

    /// Tools cached from the discovery handshake.
    pub async fn tools(&self) -> Vec<Tool> {
        self.tools.lock().await.clone()
    }

    async fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.lock().await = tools;
    }

    /// Time of the last successful exchange.
    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().await
    }

    /// Record activity now.
    pub async fn touch(&self) {
        *self.last_activity.lock().await = Utc::now();
    }

    /// Non-blocking liveness probe of the OS process.
    ///
    /// `try_wait` reaps an exited child without blocking; an error from the
    /// probe is treated as dead.
    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Kill the child and wait for it to be reaped.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        self.set_status(ProcessStatus::Stopped).await;
    }
}

/// Pool of running MCP server processes, keyed by (user, configuration).
///
/// The registry is the single pool-wide lock; it is held only for
/// registration, lookup, and removal, never across pipe I/O.
pub struct ProcessPool {
    registry: Mutex<HashMap<ProcessKey, Arc<ManagedProcess>>>,
    read_timeout: Duration,
}

impl ProcessPool {
    /// Create a pool with the standard 30s read timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_read_timeout(READ_TIMEOUT)
    }

    /// Create a pool with a custom read timeout (tests).
    #[must_use]
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            read_timeout,
        }
    }

    /// Look up the pooled process for a key.
    pub async fn get(&self, key: ProcessKey) -> Option<Arc<ManagedProcess>> {
        self.registry.lock().await.get(&key).cloned()
    }

    /// Remove and return the pooled process for a key.
    pub async fn remove(&self, key: ProcessKey) -> Option<Arc<ManagedProcess>> {
        self.registry.lock().await.remove(&key)
    }

    /// Spawn an MCP server for a stdio configuration and complete the
    /// discovery handshake.
    ///
    /// The configuration is re-validated here: the validator is the only
    /// gate between user-authored input and process execution, and it must
    /// run before every spawn. On handshake failure the process stays
    /// registered in `Error` status so the next caller can observe and
    /// replace it.
    pub async fn spawn(
        &self,
        key: ProcessKey,
        config: &ServerConfiguration,
    ) -> Result<Arc<ManagedProcess>, PoolError> {
        if config.server_type != ServerType::Stdio {
            return Err(PoolError::InvalidConfig(
                "process pool only handles stdio servers".to_string(),
            ));
        }

        let report = validator::validate(config);
        if !report.valid {
            return Err(PoolError::InvalidConfig(report.errors.join("; ")));
        }

        let launch =
            StdioLaunch::from_config(&config.server_config).map_err(PoolError::InvalidConfig)?;
        let exe_path = path::resolve_command(&launch.command).map_err(PoolError::InvalidConfig)?;

        // The child environment is fully explicit: PATH plus the configured
        // variables. Nothing from the caller's environment leaks through.
        let mut command = Command::new(&exe_path);
        command
            .args(&launch.args)
            .env_clear()
            .env("PATH", path::build_effective_path(&exe_path))
            .envs(&launch.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            PoolError::SpawnFailed(format!(
                "failed to spawn '{}': {e}",
                exe_path.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::SpawnFailed("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::SpawnFailed("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PoolError::SpawnFailed("failed to capture stderr".to_string()))?;

        let process = Arc::new(ManagedProcess {
            id: Uuid::new_v4(),
            configuration_id: config.id,
            user_id: key.user_id,
            pid: child.id(),
            status: Mutex::new(ProcessStatus::Starting),
            tools: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Utc::now()),
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
                _stderr: stderr,
            }),
            child: Mutex::new(child),
        });

        // Register before the handshake so a failed handshake leaves an
        // observable Error entry rather than a silently vanished process.
        self.registry.lock().await.insert(key, Arc::clone(&process));

        match self.handshake(&process, config).await {
            Ok(tools) => {
                let tool_count = tools.len();
                process.set_tools(tools).await;
                process.set_status(ProcessStatus::Ready).await;
                tracing::info!(
                    server_name = %config.name,
                    pid = ?process.pid,
                    tool_count,
                    "MCP server ready"
                );
                Ok(process)
            }
            Err(e) => {
                process.set_status(ProcessStatus::Error).await;
                tracing::warn!(
                    server_name = %config.name,
                    error = %e,
                    "MCP handshake failed"
                );
                Err(e)
            }
        }
    }

    /// The MCP handshake: `initialize` (id=1), the initialized
    /// notification, then `tools/list` (id=2).
    async fn handshake(
        &self,
        process: &ManagedProcess,
        config: &ServerConfiguration,
    ) -> Result<Vec<Tool>, PoolError> {
        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": "toolbridge",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        let init = request("initialize", Some(init_params), Some(RequestId::Number(1)))
            .map_err(|e| PoolError::Handshake(e.to_string()))?;

        let init_response = self.send_message(process, &init).await?;
        if let Some(error) = init_response.error() {
            return Err(PoolError::Handshake(format!(
                "initialize rejected: code={}, message={}",
                error.code, error.message
            )));
        }

        self.send_notification(process, "notifications/initialized")
            .await?;

        let list = request("tools/list", None, Some(RequestId::Number(2)))
            .map_err(|e| PoolError::Handshake(e.to_string()))?;
        let list_response = self.send_message(process, &list).await?;
        if let Some(error) = list_response.error() {
            return Err(PoolError::Handshake(format!(
                "tools/list rejected: code={}, message={}",
                error.code, error.message
            )));
        }

        let tools_value = list_response
            .result()
            .and_then(|result| result.get("tools"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        let tools: Vec<Tool> = serde_json::from_value(tools_value)?;

        tracing::debug!(
            server_name = %config.name,
            tool_count = tools.len(),
            "discovered tools"
        );
        Ok(tools)
    }

    /// Invoke a tool on a pooled process with a fresh request id.
    ///
    /// A JSON-RPC error envelope is returned inside the response, not as an
    /// `Err`: the remote tool failing is data, not a transport fault.
    pub async fn call_tool(
        &self,
        process: &ManagedProcess,
        name: &str,
        arguments: Value,
    ) -> Result<JsonRpcResponse, PoolError> {
        let call = request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
            None,
        )
        .map_err(|e| PoolError::Handshake(e.to_string()))?;

        self.send_message(process, &call).await
    }

    /// Write one JSON line to the child's stdin and read one response line
    /// from its stdout, under the fixed read timeout.
    ///
    /// The per-process pipe mutex is held for the whole exchange: the
    /// protocol has no pipelining, so interleaved writers would corrupt
    /// correlation. The response id must match the request id.
    pub async fn send_message(
        &self,
        process: &ManagedProcess,
        message: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, PoolError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut pipes = process.pipes.lock().await;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;

        let response = timeout(self.read_timeout, read_response(&mut pipes.stdout))
            .await
            .map_err(|_| PoolError::Timeout(self.read_timeout))??;
        drop(pipes);

        if response.id.as_ref() != Some(&message.id) {
            return Err(PoolError::IdMismatch {
                sent: message.id.to_string(),
                received: response
                    .id
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string),
            });
        }

        Ok(response)
    }

    /// Write a notification line; no response is expected.
    async fn send_notification(
        &self,
        process: &ManagedProcess,
        method: &str,
    ) -> Result<(), PoolError> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {},
        });
        let mut line = serde_json::to_string(&notification)?;
        line.push('\n');

        let mut pipes = process.pipes.lock().await;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;
        Ok(())
    }

    /// Kill and drop every pooled process.
    pub async fn shutdown(&self) {
        let processes: Vec<Arc<ManagedProcess>> =
            self.registry.lock().await.drain().map(|(_, p)| p).collect();
        for process in processes {
            process.kill().await;
        }
    }
}

impl Default for ProcessPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Read stdout lines until one parses as a JSON-RPC response, skipping
/// startup banners and blank lines.
async fn read_response(
    stdout: &mut BufReader<ChildStdout>,
) -> Result<JsonRpcResponse, PoolError> {
    for _ in 0..MAX_SKIPPED_LINES {
        let mut line = String::new();
        let read = stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(PoolError::ClosedStream);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) => return Ok(response),
            Err(_) => {
                tracing::debug!(line = trimmed, "skipping non-JSON-RPC output");
            }
        }
    }

    Err(PoolError::SpawnFailed(
        "no valid JSON-RPC response received".to_string(),
    ))
}
