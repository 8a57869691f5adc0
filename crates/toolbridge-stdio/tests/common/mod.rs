//! Common test infrastructure: fake MCP servers and an in-memory store.
//!
//! The fake servers are small POSIX shell scripts speaking newline-delimited
//! JSON-RPC on stdin/stdout, written into a tempdir and launched through the
//! real pool - no part of the spawn path is mocked.

#![cfg(unix)]
#![allow(dead_code)] // Not every test binary uses every helper.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::TempDir;
use toolbridge_core::{ConfigurationStore, ServerConfiguration, StoreError};

/// A well-behaved fake MCP server: answers the handshake, then serves
/// `tools/call` requests. The `echo` tool returns two text blocks, the
/// `fail` tool returns a JSON-RPC error, and the `env` tool reports
/// whether selected environment variables reached the child.
/// Appends one line to `$SPAWN_LOG` per launch when that variable is set.
const WELL_BEHAVED: &str = r#"#!/bin/sh
log_request() {
  if [ -n "${REQ_LOG:-}" ]; then printf '%s\n' "$1" >> "$REQ_LOG"; fi
}
if [ -n "${SPAWN_LOG:-}" ]; then printf 'spawn\n' >> "$SPAWN_LOG"; fi
read -r line
log_request "$line"
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"fake-mcp","version":"0.0.1"},"capabilities":{"tools":{}}}}'
read -r line
log_request "$line"
read -r line
log_request "$line"
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo two lines"},{"name":"fail","description":"Always errors"},{"name":"env","description":"Report environment"}]}}'
while read -r line; do
  log_request "$line"
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32601,"message":"Tool not found"}}\n' "$id"
      ;;
    *'"name":"env"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"home=%s explicit=%s"}]}}\n' "$id" "${HOME:-unset}" "${EXPLICIT:-unset}"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"Line 1"},{"type":"text","text":"Line 2"}]}}\n' "$id"
      ;;
  esac
done
"#;

/// Replies to every request with a fixed wrong id.
const WRONG_ID: &str = r#"#!/bin/sh
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":999,"result":{}}'
"#;

/// Reads requests forever and never answers.
const SILENT: &str = r#"#!/bin/sh
while read -r line; do :; done
"#;

/// A fake server script on disk. Keep the struct alive for the duration of
/// the test; dropping it deletes the tempdir.
pub struct FakeServer {
    dir: TempDir,
    pub script: PathBuf,
}

impl FakeServer {
    fn write(body: &str) -> Self {
        let dir = TempDir::new().expect("create tempdir");
        let script = dir.path().join("fake-mcp.sh");
        fs::write(&script, body).expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("mark script executable");
        Self { dir, script }
    }

    pub fn well_behaved() -> Self {
        Self::write(WELL_BEHAVED)
    }

    pub fn wrong_id() -> Self {
        Self::write(WRONG_ID)
    }

    pub fn silent() -> Self {
        Self::write(SILENT)
    }

    /// Path of the spawn log the well-behaved script appends to.
    pub fn spawn_log(&self) -> PathBuf {
        self.dir.path().join("spawns.log")
    }

    /// Path of the request log the well-behaved script appends to when
    /// `REQ_LOG` is set.
    pub fn request_log(&self) -> PathBuf {
        self.dir.path().join("requests.log")
    }

    /// Lines the script received, in order.
    pub fn requests(&self) -> Vec<String> {
        fs::read_to_string(self.request_log())
            .map(|log| log.lines().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Number of times the script has been launched.
    pub fn spawn_count(&self) -> usize {
        fs::read_to_string(self.spawn_log())
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    /// A stdio configuration launching this script.
    pub fn config(&self, id: i64, owner_id: i64) -> ServerConfiguration {
        self.config_with_env(id, owner_id, BTreeMap::new())
    }

    /// A stdio configuration launching this script with extra env vars.
    /// `SPAWN_LOG` is always set so tests can count launches.
    pub fn config_with_env(
        &self,
        id: i64,
        owner_id: i64,
        mut env: BTreeMap<String, String>,
    ) -> ServerConfiguration {
        env.insert(
            "SPAWN_LOG".to_string(),
            self.spawn_log().to_string_lossy().into_owned(),
        );
        ServerConfiguration::stdio(
            id,
            owner_id,
            "fake-mcp",
            self.script.to_string_lossy().into_owned(),
            vec![],
            env,
        )
    }
}

/// In-memory configuration store.
pub struct StaticStore {
    configs: Vec<ServerConfiguration>,
}

impl StaticStore {
    pub fn new(configs: Vec<ServerConfiguration>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl ConfigurationStore for StaticStore {
    async fn get(&self, id: i64) -> Result<ServerConfiguration, StoreError> {
        self.configs
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
