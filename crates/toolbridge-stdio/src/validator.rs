//! Launch configuration validation.
//!
//! This is the sole security boundary between a user-authored configuration
//! and local process execution. The pool re-runs it before every spawn, not
//! just at configuration save time. Checks are static and semantic only;
//! nothing here spawns a process.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolbridge_core::{ServerConfiguration, ServerType, StdioLaunch};
use url::Url;

use crate::path;

/// Commands that are never allowed as a server executable, regardless of
/// where they resolve to.
const COMMAND_DENYLIST: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "shred", "shutdown", "reboot", "halt", "sudo", "su", "chown",
    "chmod", "kill", "killall", "pkill",
];

/// Shell metacharacters rejected anywhere in the command or its arguments.
/// The command is never passed through a shell, but a config that smuggles
/// these in is hostile and refused outright.
const SHELL_METACHARACTERS: &[&str] = &[";", "|", "&", "$(", "`", ">", "<", "\n"];

/// Environment variables certain server templates cannot run without.
const REQUIRED_ENV: &[(&str, &[&str])] = &[
    ("linear-mcp", &["LINEAR_API_KEY"]),
    ("github-mcp", &["GITHUB_TOKEN"]),
    ("slack-mcp", &["SLACK_BOT_TOKEN"]),
];

/// Probe timeout for http/websocket reachability checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of validating a configuration. Collects every error rather than
/// stopping at the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Outcome of a reachability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
}

impl ProbeReport {
    fn ok(message: impl Into<String>, started: Instant) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            response_time_ms: elapsed_ms(started),
        }
    }

    fn failed(error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            response_time_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Validate a server configuration.
pub fn validate(config: &ServerConfiguration) -> ValidationReport {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }

    match config.server_type {
        ServerType::Stdio => validate_stdio(&config.server_config, &mut errors),
        ServerType::Http => validate_endpoint(&config.server_config, &["http", "https"], &mut errors),
        ServerType::Websocket => validate_endpoint(&config.server_config, &["ws", "wss"], &mut errors),
    }

    ValidationReport::from_errors(errors)
}

fn validate_stdio(server_config: &Value, errors: &mut Vec<String>) {
    // Structural extraction first: command string, args array, env map.
    let launch = match StdioLaunch::from_config(server_config) {
        Ok(launch) => launch,
        Err(e) => {
            errors.push(e);
            return;
        }
    };

    if launch.command.trim().is_empty() {
        errors.push("command is required for stdio servers".to_string());
        return;
    }

    if let Some(meta) = find_metacharacter(&launch.command) {
        errors.push(format!(
            "command contains shell metacharacter {meta:?}: {}",
            launch.command
        ));
    }
    for arg in &launch.args {
        if let Some(meta) = find_metacharacter(arg) {
            errors.push(format!("argument contains shell metacharacter {meta:?}: {arg}"));
        }
    }

    let basename = command_basename(&launch.command);
    if COMMAND_DENYLIST.contains(&basename) {
        errors.push(format!("command is not allowed: {basename}"));
    }

    // Only bother resolving if the command itself is clean.
    if errors.is_empty() {
        if let Err(e) = path::resolve_command(&launch.command) {
            errors.push(e);
        }
    }

    for (template, required_keys) in REQUIRED_ENV {
        if mentions_template(&launch, template) {
            for key in *required_keys {
                if !launch.env.contains_key(*key) {
                    errors.push(format!("{template} requires environment variable {key}"));
                }
            }
        }
    }
}

fn validate_endpoint(server_config: &Value, allowed_schemes: &[&str], errors: &mut Vec<String>) {
    let Some(endpoint) = server_config.get("endpoint").and_then(Value::as_str) else {
        errors.push("endpoint is required".to_string());
        return;
    };

    match Url::parse(endpoint) {
        Ok(url) => {
            if !allowed_schemes.contains(&url.scheme()) {
                errors.push(format!(
                    "endpoint scheme must be one of {allowed_schemes:?}: {endpoint}"
                ));
            }
            if url.host_str().is_none() {
                errors.push(format!("endpoint must have a host: {endpoint}"));
            }
        }
        Err(e) => errors.push(format!("endpoint is not a valid absolute URI: {e}")),
    }
}

fn find_metacharacter(input: &str) -> Option<&'static str> {
    SHELL_METACHARACTERS
        .iter()
        .find(|meta| input.contains(**meta))
        .copied()
}

fn command_basename(command: &str) -> &str {
    std::path::Path::new(command)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(command)
}

fn mentions_template(launch: &StdioLaunch, template: &str) -> bool {
    command_basename(&launch.command).contains(template)
        || launch.args.iter().any(|arg| arg.contains(template))
}

/// Lightweight reachability probe appropriate to the server type.
///
/// Never raises: every probe failure is reported as `success: false`.
pub async fn test_connection(config: &ServerConfiguration) -> ProbeReport {
    let started = Instant::now();

    let report = validate(config);
    if !report.valid {
        return ProbeReport::failed(report.errors.join("; "), started);
    }

    match config.server_type {
        ServerType::Stdio => ProbeReport::ok("command resolved", started),
        ServerType::Http => probe_http(&config.server_config, started).await,
        ServerType::Websocket => probe_tcp(&config.server_config, started).await,
    }
}

async fn probe_http(server_config: &Value, started: Instant) -> ProbeReport {
    let endpoint = server_config
        .get("endpoint")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => return ProbeReport::failed(format!("probe client error: {e}"), started),
    };

    // Any HTTP response counts as reachable; only transport errors fail.
    match client.head(endpoint).send().await {
        Ok(response) => ProbeReport::ok(
            format!("endpoint reachable (status {})", response.status()),
            started,
        ),
        Err(e) => ProbeReport::failed(format!("endpoint unreachable: {e}"), started),
    }
}

async fn probe_tcp(server_config: &Value, started: Instant) -> ProbeReport {
    let endpoint = server_config
        .get("endpoint")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => return ProbeReport::failed(format!("endpoint parse error: {e}"), started),
    };

    let Some(host) = url.host_str() else {
        return ProbeReport::failed("endpoint must have a host", started);
    };
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });

    let connect = tokio::net::TcpStream::connect((host, port));
    match tokio::time::timeout(PROBE_TIMEOUT, connect).await {
        Ok(Ok(_)) => ProbeReport::ok(format!("{host}:{port} accepts connections"), started),
        Ok(Err(e)) => ProbeReport::failed(format!("connect failed: {e}"), started),
        Err(_) => ProbeReport::failed(format!("connect timed out after {PROBE_TIMEOUT:?}"), started),
    }
}
