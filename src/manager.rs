//! Account → backend registry.
//!
//! [`ServerManager`] is the process-wide owner of every backend instance.
//! It is constructed once, injected wherever backends are needed, and its
//! [`shutdown_all`](ServerManager::shutdown_all) hook runs during service
//! teardown — there is no implicit global state.
//!
//! ## Locking
//!
//! The account map supports lock-free reads; published entries are never
//! mutated and are only removed by shutdown. Creation is serialized by a
//! single async mutex with a re-check after acquisition (double-checked
//! locking), so concurrent first accesses for the same account produce
//! exactly one process and one port. Shutdown takes the same lock, so a
//! shutdown in progress blocks new creations and vice versa.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::error::{Error, Result};
use crate::install::EngineInstallers;
use crate::server::{MockServer, ServerSettings};
use crate::utils::{allocate_free_port, ensure_dir};

/// How long `get_or_create` waits for a new backend to become ready.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Subdirectory of the data dir holding per-account state files.
const PERSIST_SUBDIR: &str = "kinesis";

/// Registry of per-account backend instances.
pub struct ServerManager {
    servers: DashMap<String, Arc<MockServer>>,
    create_lock: Mutex<()>,
    config: GlobalConfig,
    installers: EngineInstallers,
    startup_timeout: Duration,
}

impl ServerManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: GlobalConfig, installers: EngineInstallers) -> Self {
        Self {
            servers: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
            installers,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    /// Override the startup-readiness window (mainly for tests).
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Return the backend for `account_id`, creating and starting it on
    /// first access.
    ///
    /// The warm path is a lock-free map read. The cold path resolves
    /// configuration, installs the engine if needed, starts the process,
    /// publishes the instance, and waits up to the startup timeout for
    /// readiness.
    ///
    /// # Errors
    ///
    /// [`Error::StartupTimeout`] if the backend never became ready; the
    /// instance stays registered and supervised, so a later call may find it
    /// recovered. Installation and port/directory failures abort before
    /// anything is registered.
    pub async fn get_or_create(&self, account_id: &str) -> Result<Arc<MockServer>> {
        if let Some(server) = self.servers.get(account_id) {
            return Ok(server.value().clone());
        }

        let _guard = self.create_lock.lock().await;
        // Re-check: another caller may have published while we waited.
        if let Some(server) = self.servers.get(account_id) {
            return Ok(server.value().clone());
        }

        info!(account_id, "creating streaming backend");
        let server = self.create_server(account_id).await?;
        self.servers
            .insert(account_id.to_string(), server.clone());

        server.start();
        if !server.wait_until_ready(self.startup_timeout).await {
            // Left registered: it stays supervised and a later call may
            // find it recovered.
            warn!(
                account_id,
                timeout_secs = self.startup_timeout.as_secs(),
                "backend did not become ready in time"
            );
            return Err(Error::startup_timeout(
                account_id,
                self.startup_timeout.as_secs(),
            ));
        }

        info!(account_id, port = server.port(), "streaming backend ready");
        Ok(server)
    }

    /// Look up an already-registered backend without creating one.
    #[must_use]
    pub fn get(&self, account_id: &str) -> Option<Arc<MockServer>> {
        self.servers.get(account_id).map(|entry| entry.value().clone())
    }

    /// Number of registered backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Terminate and remove every registered backend.
    ///
    /// Holds the creation lock, so no instance can be created mid-shutdown.
    /// A no-op on an empty registry.
    pub async fn shutdown_all(&self) {
        let _guard = self.create_lock.lock().await;
        loop {
            let next = self.servers.iter().next().map(|entry| entry.key().clone());
            let Some(account_id) = next else { break };
            if let Some((account_id, server)) = self.servers.remove(&account_id) {
                info!(account_id = %account_id, "shutting down streaming backend");
                server.shutdown().await;
            }
        }
    }

    /// Resolve per-instance configuration and construct the backend.
    ///
    /// Runs under the creation lock, once per new account.
    async fn create_server(&self, account_id: &str) -> Result<Arc<MockServer>> {
        let port = allocate_free_port()?;
        let tls_port = allocate_free_port()?;

        let data_dir = match &self.config.data_dir {
            Some(root) => {
                // State files are one json per account, so a single shared
                // subdirectory is enough.
                let dir = root.join(PERSIST_SUBDIR);
                ensure_dir(&dir)?;
                Some(dir)
            },
            None => None,
        };

        let engine = self.config.engine;
        let installer = self.installers.get(engine);
        installer.install().await?;

        let settings = ServerSettings {
            account_id: account_id.to_string(),
            engine,
            host: self.config.host.clone(),
            port,
            tls_port,
            exe_path: installer.executable_path(),
            log_level: self.config.resolved_log_level(),
            latency: self.config.latency(),
            shard_limit: self.config.shard_limit,
            on_demand_stream_count_limit: self.config.on_demand_stream_count_limit,
            persistence: self.config.persistence,
            data_dir,
            persist_interval: self.config.persist_interval.clone(),
            initial_heap_size: self.config.initial_heap_size.clone(),
            maximum_heap_size: self.config.maximum_heap_size.clone(),
            runtime_env: installer.runtime_env_vars(),
        };

        Ok(Arc::new(MockServer::new(settings)))
    }
}
