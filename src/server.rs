//! One account's mock streaming backend.
//!
//! A [`MockServer`] translates its resolved settings into the concrete
//! command line and environment map for one of the two engine variants,
//! owns the supervised process running it, and answers readiness/liveness
//! probes for the routing layer.
//!
//! Engine dispatch is a closed two-variant match on [`Engine`] — both
//! variants expose the identical external contract and differ only in how
//! the command and a handful of environment extras are built.
//!
//! ## States
//!
//! `Unstarted → Starting → Ready → Terminated`. Reaching `Ready` requires
//! the readiness probe to succeed; a crash-and-restart cycle does not change
//! the state (the same instance keeps serving once the process is back).
//! `Terminated` is final.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::Engine;
use crate::process::{ProcessSpec, SupervisedProcess};

/// Environment variable names forming the contract with the backend binary.
const ENV_PLAIN_PORT: &str = "KINESIS_MOCK_PLAIN_PORT";
const ENV_TLS_PORT: &str = "KINESIS_MOCK_TLS_PORT";
const ENV_SHARD_LIMIT: &str = "SHARD_LIMIT";
const ENV_ON_DEMAND_STREAM_COUNT_LIMIT: &str = "ON_DEMAND_STREAM_COUNT_LIMIT";
const ENV_ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";
const ENV_SHOULD_PERSIST_DATA: &str = "SHOULD_PERSIST_DATA";
const ENV_PERSIST_PATH: &str = "PERSIST_PATH";
const ENV_PERSIST_FILE_NAME: &str = "PERSIST_FILE_NAME";
const ENV_PERSIST_INTERVAL: &str = "PERSIST_INTERVAL";
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
const ENV_CERT_PATH: &str = "KINESIS_MOCK_CERT_PATH";

/// The latency-sensitive operations; each gets the same injected duration.
const LATENCY_PARAMS: [&str; 10] = [
    "CREATE_STREAM_DURATION",
    "DELETE_STREAM_DURATION",
    "REGISTER_STREAM_CONSUMER_DURATION",
    "START_STREAM_ENCRYPTION_DURATION",
    "STOP_STREAM_ENCRYPTION_DURATION",
    "DEREGISTER_STREAM_CONSUMER_DURATION",
    "MERGE_SHARDS_DURATION",
    "SPLIT_SHARD_DURATION",
    "UPDATE_SHARD_COUNT_DURATION",
    "UPDATE_STREAM_MODE_DURATION",
];

/// Timeout for a single liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause between readiness probe attempts.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Constructed, process not launched yet.
    Unstarted = 0,
    /// Process launched, readiness probe not yet satisfied.
    Starting = 1,
    /// Readiness probe succeeded; serving (restarts are invisible here).
    Ready = 2,
    /// Explicitly shut down. Final.
    Terminated = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Terminated,
            _ => Self::Unstarted,
        }
    }
}

/// Resolved per-instance settings, produced by the registry's configuration
/// resolution step.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Account this backend belongs to.
    pub account_id: String,
    /// Engine variant to launch.
    pub engine: Engine,
    /// Host address for routing and probing.
    pub host: String,
    /// Primary listener port.
    pub port: u16,
    /// Second allocated port, passed to the backend only so its TLS listener
    /// cannot collide with other processes. Never exposed to callers.
    pub tls_port: u16,
    /// Installed executable (jar or script entry point).
    pub exe_path: PathBuf,
    /// Resolved backend log level.
    pub log_level: String,
    /// Latency string in the backend's duration syntax, e.g. `"500ms"`.
    pub latency: String,
    /// Shard-count limit.
    pub shard_limit: u32,
    /// Per-account on-demand stream limit.
    pub on_demand_stream_count_limit: u32,
    /// Global persistence flag.
    pub persistence: bool,
    /// Directory for persisted stream state, if any.
    pub data_dir: Option<PathBuf>,
    /// Persistence flush interval, e.g. `"5s"`.
    pub persist_interval: String,
    /// Initial JVM heap size (VM-hosted engine only).
    pub initial_heap_size: String,
    /// Maximum JVM heap size (VM-hosted engine only).
    pub maximum_heap_size: String,
    /// Runtime environment supplied by the engine's installer.
    pub runtime_env: BTreeMap<String, String>,
}

/// One account's running (or about-to-run) backend instance.
pub struct MockServer {
    settings: ServerSettings,
    state: AtomicU8,
    process: parking_lot::Mutex<Option<Arc<SupervisedProcess>>>,
}

impl MockServer {
    /// Wrap resolved settings; does not launch anything yet.
    #[must_use]
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            state: AtomicU8::new(ServerState::Unstarted as u8),
            process: parking_lot::Mutex::new(None),
        }
    }

    /// Account this instance belongs to.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.settings.account_id
    }

    /// Primary listener port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.settings.port
    }

    /// Host address for routing.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.settings.host
    }

    /// `host:port` address for forwarding this account's traffic.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the underlying process is currently running.
    ///
    /// Dips to `false` during an auto-restart; distinct from [`state`].
    ///
    /// [`state`]: MockServer::state
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process
            .lock()
            .as_ref()
            .is_some_and(|process| process.is_alive())
    }

    /// Filename for this account's persisted stream state.
    ///
    /// Derived from the account id so a restarted instance reopens the same
    /// state file.
    #[must_use]
    pub fn data_filename(&self) -> String {
        format!("{}.json", self.settings.account_id)
    }

    /// Persistence holds only when a data directory was supplied and the
    /// global flag is on.
    fn persistence_enabled(&self) -> bool {
        self.settings.persistence && self.settings.data_dir.is_some()
    }

    /// Launch the supervised backend process.
    ///
    /// Idempotent: a second call while a process handle exists is a no-op.
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.process.lock();
        if slot.is_some() {
            debug!(account_id = %self.settings.account_id, "backend already started");
            return;
        }

        let (program, args) = self.command();
        let env = self.environment();
        debug!(
            account_id = %self.settings.account_id,
            engine = self.settings.engine.name(),
            %program,
            port = self.settings.port,
            "starting backend process"
        );

        let account_id = self.settings.account_id.clone();
        let spec = ProcessSpec {
            name: format!("kinesis-mock:{}", self.settings.account_id),
            program,
            args,
            env,
            auto_restart: true,
            log_listener: Some(Arc::new(move |line: &str| {
                info!(account_id = %account_id, "{line}");
            })),
        };

        self.state
            .store(ServerState::Starting as u8, Ordering::SeqCst);
        *slot = Some(Arc::new(SupervisedProcess::spawn(spec)));
    }

    /// Poll the primary port until it accepts connections or the timeout
    /// elapses. Returns whether the backend became ready.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.probe().await {
                let _ = self.state.compare_exchange(
                    ServerState::Starting as u8,
                    ServerState::Ready as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Single liveness probe: is the primary port accepting connections?
    pub async fn is_up(&self) -> bool {
        self.probe().await
    }

    /// Terminate the backend process. Final; the instance cannot be
    /// restarted afterwards.
    pub async fn shutdown(&self) {
        let process = self.process.lock().take();
        self.state
            .store(ServerState::Terminated as u8, Ordering::SeqCst);
        if let Some(process) = process {
            process.terminate().await;
        }
        info!(account_id = %self.settings.account_id, "backend terminated");
    }

    async fn probe(&self) -> bool {
        let addr = (self.settings.host.as_str(), self.settings.port);
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// Launcher program and arguments for this instance's engine.
    fn command(&self) -> (String, Vec<String>) {
        let exe = self.settings.exe_path.display().to_string();
        match self.settings.engine {
            Engine::Node => ("node".to_string(), vec![exe]),
            Engine::Scala => (
                "java".to_string(),
                vec![
                    "-jar".to_string(),
                    format!("-Xms{}", self.settings.initial_heap_size),
                    format!("-Xmx{}", self.settings.maximum_heap_size),
                    "-XX:MaxGCPauseMillis=500".to_string(),
                    "-XX:+ExitOnOutOfMemoryError".to_string(),
                    exe,
                ],
            ),
        }
    }

    /// Full environment map handed to the backend process.
    fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        match self.settings.engine {
            Engine::Node => {
                // The script build reads its certificate bundle from a fixed
                // sibling of the entry point.
                let cert_path = self.settings.exe_path.with_file_name("server.json");
                env.insert(
                    ENV_CERT_PATH.to_string(),
                    cert_path.display().to_string(),
                );
            },
            Engine::Scala => {
                // The installer locates the managed runtime (JAVA_HOME etc.);
                // those variables win over anything inherited.
                env.extend(self.settings.runtime_env.clone());
            },
        }

        env.insert(ENV_PLAIN_PORT.to_string(), self.settings.port.to_string());
        // The backend opens a second, TLS listener this service never uses.
        // It still gets a dedicated free port so it cannot collide.
        env.insert(ENV_TLS_PORT.to_string(), self.settings.tls_port.to_string());
        env.insert(
            ENV_SHARD_LIMIT.to_string(),
            self.settings.shard_limit.to_string(),
        );
        env.insert(
            ENV_ON_DEMAND_STREAM_COUNT_LIMIT.to_string(),
            self.settings.on_demand_stream_count_limit.to_string(),
        );
        env.insert(
            ENV_ACCOUNT_ID.to_string(),
            self.settings.account_id.clone(),
        );

        for param in LATENCY_PARAMS {
            env.insert(param.to_string(), self.settings.latency.clone());
        }

        if self.persistence_enabled()
            && let Some(data_dir) = &self.settings.data_dir
        {
            env.insert(ENV_SHOULD_PERSIST_DATA.to_string(), "true".to_string());
            env.insert(
                ENV_PERSIST_PATH.to_string(),
                data_dir.display().to_string(),
            );
            env.insert(ENV_PERSIST_FILE_NAME.to_string(), self.data_filename());
            env.insert(
                ENV_PERSIST_INTERVAL.to_string(),
                self.settings.persist_interval.clone(),
            );
        }

        env.insert(ENV_LOG_LEVEL.to_string(), self.settings.log_level.clone());

        env
    }
}
