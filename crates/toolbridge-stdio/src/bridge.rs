//! Session-facing bridge manager.
//!
//! Owns no OS resources directly: it composes the configuration store, the
//! validator, and the process pool into the public caller API, and layers
//! the resilience policy on top - process reuse, crash detection, retry
//! with exponential backoff, and a per-key circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use toolbridge_core::{
    BridgeError, ConfigurationStore, ProcessStatus, ServerConfiguration, ServerStatusReport,
    ServerType, Tool, ToolOutcome,
};

use crate::content::format_tool_result;
use crate::pool::{ManagedProcess, PoolError, ProcessPool};

pub use crate::pool::ProcessKey;

/// Retry and circuit-breaker parameters.
///
/// Defaults: 3 spawn attempts with 1s/2s delays capped at 4s, no jitter;
/// the circuit opens after 5 accumulated failures for a key and self-heals
/// after a 60s cooldown.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped.
    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Spawn-failure state for one process key.
#[derive(Debug, Default)]
struct CircuitBreaker {
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn record_failure(&mut self, policy: &RetryPolicy) {
        self.failure_count += 1;
        if self.failure_count >= policy.failure_threshold && self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
    }

    /// Remaining cooldown if the circuit is open. An elapsed cooldown
    /// self-heals the breaker.
    fn remaining_cooldown(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        let opened_at = self.opened_at?;
        let elapsed = opened_at.elapsed();
        if elapsed >= policy.cooldown {
            *self = Self::default();
            None
        } else {
            Some(policy.cooldown - elapsed)
        }
    }
}

/// Brokers tool discovery and invocation for (user, configuration) pairs.
pub struct BridgeManager {
    store: Arc<dyn ConfigurationStore>,
    pool: Arc<ProcessPool>,
    circuits: Mutex<HashMap<ProcessKey, CircuitBreaker>>,
    policy: RetryPolicy,
}

impl BridgeManager {
    /// Create a manager with the default pool and policy.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        Self::with_policy(store, Arc::new(ProcessPool::new()), RetryPolicy::default())
    }

    /// Create a manager with an injected pool and policy (tests, embedders).
    #[must_use]
    pub fn with_policy(
        store: Arc<dyn ConfigurationStore>,
        pool: Arc<ProcessPool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            pool,
            circuits: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// List the tools advertised by a configured server, spawning its
    /// process on first use and reusing it afterwards.
    pub async fn list_tools(
        &self,
        user_id: i64,
        configuration_id: i64,
    ) -> Result<Vec<Tool>, BridgeError> {
        let config = self.load_stdio_config(configuration_id).await?;
        let key = ProcessKey::new(user_id, configuration_id);
        let process = self.ensure_process(key, &config).await?;
        Ok(process.tools().await)
    }

    /// Invoke a tool and normalize its result.
    ///
    /// Errors reported by the MCP server itself come back as
    /// `ToolOutcome { success: false, .. }`, never as `Err`: one failing
    /// call must not destabilize the pooled process or the caller's loop.
    pub async fn execute_tool(
        &self,
        user_id: i64,
        configuration_id: i64,
        tool_name: &str,
        args: Value,
    ) -> Result<ToolOutcome, BridgeError> {
        let config = self.load_stdio_config(configuration_id).await?;
        let key = ProcessKey::new(user_id, configuration_id);
        let process = self.ensure_process(key, &config).await?;

        let started = Instant::now();
        let response = self
            .pool
            .call_tool(&process, tool_name, args)
            .await
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        process.touch().await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(format_tool_result(&response).with_execution_time(elapsed_ms))
    }

    /// Runtime snapshot for a key. Pure read: no spawn, no probe, no
    /// registry mutation.
    pub async fn server_status(&self, user_id: i64, configuration_id: i64) -> ServerStatusReport {
        let key = ProcessKey::new(user_id, configuration_id);
        match self.pool.get(key).await {
            None => ServerStatusReport::stopped(),
            Some(process) => ServerStatusReport {
                status: process.status().await,
                last_activity: Some(process.last_activity().await),
                tools_count: process.tools().await.len(),
            },
        }
    }

    /// Externally triggered disconnect: kill and forget the pooled process.
    /// The next call for this key spawns a fresh one.
    pub async fn disconnect(&self, user_id: i64, configuration_id: i64) {
        let key = ProcessKey::new(user_id, configuration_id);
        if let Some(process) = self.pool.remove(key).await {
            process.kill().await;
            tracing::info!(
                user_id,
                configuration_id,
                "disconnected pooled MCP server"
            );
        }
    }

    /// Load a configuration and reject anything this bridge cannot serve.
    /// Disabled and non-stdio configs are fatal configuration errors;
    /// http/websocket tools are discovered by a different path.
    async fn load_stdio_config(
        &self,
        configuration_id: i64,
    ) -> Result<ServerConfiguration, BridgeError> {
        let config = self.store.get(configuration_id).await?;

        if !config.enabled {
            return Err(BridgeError::Configuration(format!(
                "server '{}' is disabled",
                config.name
            )));
        }
        if config.server_type != ServerType::Stdio {
            return Err(BridgeError::Configuration(format!(
                "server '{}' is not a stdio server",
                config.name
            )));
        }
        Ok(config)
    }

    /// Return the pooled process for a key, replacing it when it has
    /// crashed. A process in `Error` status or one whose OS process has
    /// exited is discarded and respawned; a merely slow process (e.g. one
    /// that timed out on its last call) is left alone.
    async fn ensure_process(
        &self,
        key: ProcessKey,
        config: &ServerConfiguration,
    ) -> Result<Arc<ManagedProcess>, BridgeError> {
        if let Some(process) = self.pool.get(key).await {
            let crashed =
                process.status().await == ProcessStatus::Error || !process.is_alive().await;
            if !crashed {
                return Ok(process);
            }
            tracing::warn!(
                user_id = key.user_id,
                configuration_id = key.configuration_id,
                pid = ?process.pid,
                "pooled MCP server is dead, respawning"
            );
            self.pool.remove(key).await;
        }

        self.spawn_with_retry(key, config).await
    }

    /// Spawn with exponential backoff behind the circuit breaker.
    ///
    /// An open circuit fails fast without any spawn attempt. Validation
    /// failures are fatal and never retried. Every failed attempt feeds the
    /// breaker; once it opens, the remaining attempts of this call are
    /// abandoned too.
    pub async fn spawn_with_retry(
        &self,
        key: ProcessKey,
        config: &ServerConfiguration,
    ) -> Result<Arc<ManagedProcess>, BridgeError> {
        if let Some(remaining) = self.circuit_cooldown(key).await {
            return Err(BridgeError::CircuitOpen {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        let mut last_error: Option<PoolError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
            }

            match self.pool.spawn(key, config).await {
                Ok(process) => {
                    self.circuits.lock().await.remove(&key);
                    return Ok(process);
                }
                Err(PoolError::InvalidConfig(message)) => {
                    return Err(BridgeError::Configuration(message));
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = key.user_id,
                        configuration_id = key.configuration_id,
                        attempt,
                        error = %e,
                        "MCP server spawn attempt failed"
                    );
                    let opened = {
                        let mut circuits = self.circuits.lock().await;
                        let breaker = circuits.entry(key).or_default();
                        breaker.record_failure(&self.policy);
                        breaker.opened_at.is_some()
                    };
                    last_error = Some(e);
                    if opened {
                        break;
                    }
                }
            }
        }

        Err(BridgeError::SpawnFailed(
            last_error.map_or_else(|| "no spawn attempt made".to_string(), |e| e.to_string()),
        ))
    }

    /// Remaining cooldown for an open circuit, self-healing an elapsed one.
    async fn circuit_cooldown(&self, key: ProcessKey) -> Option<Duration> {
        let mut circuits = self.circuits.lock().await;
        let breaker = circuits.get_mut(&key)?;
        breaker.remaining_cooldown(&self.policy)
    }

    /// Kill every pooled process. For embedder shutdown paths.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use toolbridge_core::StoreError;

    /// In-memory store for tests.
    struct StaticStore {
        configs: Vec<ServerConfiguration>,
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

    fn manager_with(configs: Vec<ServerConfiguration>, policy: RetryPolicy) -> BridgeManager {
        BridgeManager::with_policy(
            Arc::new(StaticStore { configs }),
            Arc::new(ProcessPool::with_read_timeout(Duration::from_secs(2))),
            policy,
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn unknown_configuration_is_not_found() {
        let manager = manager_with(vec![], fast_policy());
        let err = manager.list_tools(1, 99).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn disabled_configuration_is_fatal() {
        let config = ServerConfiguration::stdio(7, 1, "off", "true", vec![], BTreeMap::new())
            .with_enabled(false);
        let manager = manager_with(vec![config], fast_policy());
        let err = manager.list_tools(1, 7).await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn non_stdio_configuration_is_fatal() {
        let config = ServerConfiguration::http(8, 1, "api", "https://example.com/mcp");
        let manager = manager_with(vec![config], fast_policy());
        let err = manager.list_tools(1, 8).await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[tokio::test]
    async fn status_for_unknown_key_is_stopped_without_side_effects() {
        let manager = manager_with(vec![], fast_policy());
        let report = manager.server_status(1, 1).await;
        assert_eq!(report.status, ProcessStatus::Stopped);
        assert!(report.last_activity.is_none());
        assert_eq!(report.tools_count, 0);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn circuit_opens_after_threshold_and_fails_fast() {
        // `true` resolves and spawns but exits without speaking MCP, so
        // every spawn attempt fails the handshake.
        let config = ServerConfiguration::stdio(3, 1, "flappy", "true", vec![], BTreeMap::new());
        let manager = manager_with(vec![config], fast_policy());

        for call in 1..=5 {
            let err = manager.list_tools(1, 3).await.unwrap_err();
            assert!(
                matches!(err, BridgeError::SpawnFailed(_)),
                "call {call}: {err:?}"
            );
        }

        // Sixth call: circuit is open, no spawn attempted.
        let err = manager.list_tools(1, 3).await.unwrap_err();
        assert!(matches!(err, BridgeError::CircuitOpen { .. }), "{err:?}");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn circuit_self_heals_after_cooldown() {
        let config = ServerConfiguration::stdio(4, 1, "flappy", "true", vec![], BTreeMap::new());
        let policy = RetryPolicy {
            cooldown: Duration::from_millis(50),
            ..fast_policy()
        };
        let manager = manager_with(vec![config], policy);

        for _ in 0..5 {
            let _ = manager.list_tools(1, 4).await.unwrap_err();
        }
        assert!(matches!(
            manager.list_tools(1, 4).await.unwrap_err(),
            BridgeError::CircuitOpen { .. }
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Cooldown elapsed: spawning is attempted again (and still fails,
        // but as a spawn failure rather than a fail-fast rejection).
        assert!(matches!(
            manager.list_tools(1, 4).await.unwrap_err(),
            BridgeError::SpawnFailed(_)
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn circuits_are_per_key() {
        let flappy = ServerConfiguration::stdio(5, 1, "flappy", "true", vec![], BTreeMap::new());
        let manager = manager_with(vec![flappy], fast_policy());

        for _ in 0..5 {
            let _ = manager.list_tools(1, 5).await.unwrap_err();
        }
        assert!(matches!(
            manager.list_tools(1, 5).await.unwrap_err(),
            BridgeError::CircuitOpen { .. }
        ));

        // Same configuration under another user has its own circuit.
        assert!(matches!(
            manager.list_tools(2, 5).await.unwrap_err(),
            BridgeError::SpawnFailed(_)
        ));
    }

    #[test]
    fn backoff_delays_are_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(4));
    }
}
