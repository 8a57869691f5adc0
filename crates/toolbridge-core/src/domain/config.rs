//! Server configuration domain types.
//!
//! Configurations are authored by users and persisted by an external CRUD
//! layer; this subsystem reads them and never writes them back. The
//! `server_config` payload stays untyped JSON until the validator has
//! accepted it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Transport type of an MCP server connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    /// Stdio-based server - toolbridge spawns and manages the process
    #[default]
    Stdio,
    /// HTTP server - external process, handled by a different transport
    Http,
    /// WebSocket server - external process, handled by a different transport
    Websocket,
}

/// A persisted MCP server configuration, read-only to the bridge.
///
/// `server_config` is untrusted user input. For stdio servers it carries
/// `{command, args, env}`; for http/websocket servers `{endpoint, headers}`.
/// Required fields depend on `server_type` and are enforced by the validator
/// before any process is spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfiguration {
    /// Database ID of the configuration.
    pub id: i64,

    /// ID of the owning user.
    pub owner_id: i64,

    /// User-friendly name for the server.
    pub name: String,

    /// Transport type (stdio, http, or websocket).
    pub server_type: ServerType,

    /// Launch/connection parameters, untyped until validated.
    pub server_config: Value,

    /// Whether tools from this server may be used at all.
    pub enabled: bool,

    /// Free-form metadata owned by the persistence layer.
    #[serde(default)]
    pub metadata: Value,
}

impl ServerConfiguration {
    /// Create a stdio server configuration.
    #[must_use]
    pub fn stdio(
        id: i64,
        owner_id: i64,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            server_type: ServerType::Stdio,
            server_config: json!({
                "command": command.into(),
                "args": args,
                "env": env,
            }),
            enabled: true,
            metadata: Value::Null,
        }
    }

    /// Create an HTTP server configuration.
    #[must_use]
    pub fn http(id: i64, owner_id: i64, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            server_type: ServerType::Http,
            server_config: json!({ "endpoint": endpoint.into() }),
            enabled: true,
            metadata: Value::Null,
        }
    }

    /// Create a WebSocket server configuration.
    #[must_use]
    pub fn websocket(
        id: i64,
        owner_id: i64,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            name: name.into(),
            server_type: ServerType::Websocket,
            server_config: json!({ "endpoint": endpoint.into() }),
            enabled: true,
            metadata: Value::Null,
        }
    }

    /// Set enabled status.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Typed extraction of a stdio `server_config` payload.
///
/// Only structural requirements are enforced here (command is a string,
/// args an array of strings, env a string-to-string map). Security checks
/// live in the validator, which must pass before this launch is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioLaunch {
    /// Executable name or absolute path.
    pub command: String,
    /// Arguments passed verbatim to the executable.
    pub args: Vec<String>,
    /// Environment variables for the child process. This is the complete
    /// non-PATH environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
}

impl StdioLaunch {
    /// Extract a launch description from an untyped `server_config` value.
    pub fn from_config(server_config: &Value) -> Result<Self, String> {
        let obj = server_config
            .as_object()
            .ok_or_else(|| "server_config must be an object".to_string())?;

        let command = obj
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "server_config.command must be a string".to_string())?
            .to_string();

        let args = match obj.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(ToString::to_string)
                        .ok_or_else(|| "server_config.args entries must be strings".to_string())
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err("server_config.args must be an array".to_string()),
        };

        let env = match obj.get("env") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, value)| {
                    value
                        .as_str()
                        .map(|v| (key.clone(), v.to_string()))
                        .ok_or_else(|| "server_config.env values must be strings".to_string())
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?,
            Some(_) => return Err("server_config.env must be a key/value map".to_string()),
        };

        Ok(Self { command, args, env })
    }
}
