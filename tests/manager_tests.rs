//! Integration tests for the account → backend registry.
//!
//! These tests run against a stub installer whose "backend" never listens,
//! so cold-path creations end in a startup timeout; the registry semantics
//! (one instance per account, disjoint ports, retained timed-out entries,
//! shutdown draining) are all observable anyway. Readiness is exercised by
//! binding a local TCP listener on the instance's port.
//!
//! The full end-to-end scenario needs a real `node` on PATH and is marked
//! `#[ignore]`. Run it with:
//! ```bash
//! cargo test --test manager_tests -- --ignored
//! ```

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mockstream::{
    Engine, EngineInstaller, EngineInstallers, Error, GlobalConfig, Result, ServerManager,
    ServerState,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Installer stub: counts install calls, optionally fails, installs nothing.
struct StubInstaller {
    exe: PathBuf,
    install_calls: AtomicUsize,
    fail: bool,
}

impl StubInstaller {
    fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            install_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            exe: PathBuf::from("/nonexistent"),
            install_calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineInstaller for StubInstaller {
    async fn install(&self) -> Result<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::installation("node", "artifact unavailable"));
        }
        Ok(())
    }

    fn executable_path(&self) -> PathBuf {
        self.exe.clone()
    }

    fn runtime_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

fn test_config() -> GlobalConfig {
    GlobalConfig {
        host: "127.0.0.1".to_string(),
        ..GlobalConfig::default()
    }
}

fn manager(config: GlobalConfig, timeout: Duration) -> (ServerManager, Arc<StubInstaller>) {
    let stub = Arc::new(StubInstaller::new(PathBuf::from("/nonexistent/main.js")));
    let installers = EngineInstallers::new(stub.clone(), stub.clone());
    let manager = ServerManager::new(config, installers).with_startup_timeout(timeout);
    (manager, stub)
}

#[tokio::test]
async fn test_startup_timeout_leaves_instance_registered() {
    init_logging();
    let (manager, _) = manager(test_config(), Duration::from_millis(300));

    let result = manager.get_or_create("a1").await;
    assert!(matches!(result, Err(Error::StartupTimeout { .. })));

    // The half-started instance stays registered and keeps its state.
    assert_eq!(manager.len(), 1);
    let server = manager.get("a1").expect("instance should stay registered");
    assert_eq!(server.state(), ServerState::Starting);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_distinct_accounts_get_disjoint_ports() {
    init_logging();
    let (manager, _) = manager(test_config(), Duration::from_millis(200));

    let _ = manager.get_or_create("a1").await;
    let _ = manager.get_or_create("a2").await;

    let p1 = manager.get("a1").unwrap().port();
    let p2 = manager.get("a2").unwrap().port();
    assert_ne!(p1, p2);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_warm_path_is_idempotent() {
    init_logging();
    let (manager, stub) = manager(test_config(), Duration::from_millis(200));

    let _ = manager.get_or_create("a1").await;
    let first = manager.get("a1").unwrap();

    // Warm path: same instance, no second install or port allocation.
    let second = manager.get_or_create("a1").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.port(), second.port());
    assert_eq!(stub.install_calls(), 1);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_concurrent_first_access_creates_exactly_one_instance() {
    init_logging();
    let (manager, stub) = manager(test_config(), Duration::from_millis(300));

    let (r1, r2) = tokio::join!(manager.get_or_create("t"), manager.get_or_create("t"));

    // One caller did the creation (and timed out waiting); the loser of the
    // lock race observed the published entry on its re-check.
    assert_eq!(stub.install_calls(), 1);
    assert_eq!(manager.len(), 1);
    let port = manager.get("t").unwrap().port();
    for result in [r1, r2] {
        if let Ok(server) = result {
            assert_eq!(server.port(), port);
        }
    }

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_timed_out_instance_can_recover() {
    init_logging();
    let (manager, _) = manager(test_config(), Duration::from_millis(200));

    let result = manager.get_or_create("a1").await;
    assert!(matches!(result, Err(Error::StartupTimeout { .. })));
    let server = manager.get("a1").unwrap();

    // The backend comes up late (simulated by binding its port).
    let _listener = TcpListener::bind(("127.0.0.1", server.port())).unwrap();
    assert!(server.wait_until_ready(Duration::from_secs(1)).await);
    assert_eq!(server.state(), ServerState::Ready);

    // Subsequent callers get the recovered instance on the fast path.
    let again = manager.get_or_create("a1").await.unwrap();
    assert!(Arc::ptr_eq(&server, &again));
    assert!(again.is_up().await);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_shutdown_all_then_recreate_builds_fresh_instance() {
    init_logging();
    let (manager, stub) = manager(test_config(), Duration::from_millis(200));

    let _ = manager.get_or_create("a1").await;
    let old = manager.get("a1").unwrap();
    let old_port = old.port();

    manager.shutdown_all().await;
    assert!(manager.is_empty());
    assert_eq!(old.state(), ServerState::Terminated);

    // Occupy the old port so a fresh allocation cannot collide with it.
    let _hold = TcpListener::bind(("127.0.0.1", old_port)).unwrap();

    let _ = manager.get_or_create("a1").await;
    let fresh = manager.get("a1").unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_ne!(fresh.port(), old_port);
    assert_eq!(stub.install_calls(), 2);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_shutdown_all_on_empty_registry_is_noop() {
    init_logging();
    let (manager, _) = manager(test_config(), Duration::from_millis(200));
    manager.shutdown_all().await;
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_installation_failure_registers_nothing() {
    init_logging();
    let stub = Arc::new(StubInstaller::failing());
    let installers = EngineInstallers::new(stub.clone(), stub.clone());
    let manager = ServerManager::new(test_config(), installers)
        .with_startup_timeout(Duration::from_millis(200));

    let result = manager.get_or_create("a1").await;
    assert!(matches!(result, Err(Error::Installation { .. })));
    assert!(manager.is_empty());
    assert!(manager.get("a1").is_none());
}

#[tokio::test]
async fn test_persistence_directory_is_created() {
    init_logging();
    let data_root = tempfile::TempDir::new().unwrap();
    let config = GlobalConfig {
        host: "127.0.0.1".to_string(),
        data_dir: Some(data_root.path().to_path_buf()),
        persistence: true,
        ..GlobalConfig::default()
    };
    let (manager, _) = manager(config, Duration::from_millis(200));

    let _ = manager.get_or_create("acct123").await;
    assert!(data_root.path().join("kinesis").is_dir());

    manager.shutdown_all().await;
}

/// Full lifecycle against a real script backend.
///
/// The fixture is a minimal stand-in for the mock engine: it reads the port
/// contract from the environment and listens on the primary port.
#[tokio::test]
#[ignore = "requires node on PATH"]
async fn test_full_lifecycle_with_node_backend() {
    init_logging();
    let install_dir = tempfile::TempDir::new().unwrap();
    let main_js = install_dir.path().join("main.js");
    std::fs::write(
        &main_js,
        r#"
const net = require("net");
const port = parseInt(process.env.KINESIS_MOCK_PLAIN_PORT, 10);
net.createServer(() => {}).listen(port, "127.0.0.1", () => {
    console.log("listening on " + port);
});
"#,
    )
    .unwrap();

    let stub = Arc::new(StubInstaller::new(main_js));
    let installers = EngineInstallers::new(stub.clone(), stub.clone());
    let config = GlobalConfig {
        engine: Engine::Node,
        host: "127.0.0.1".to_string(),
        ..GlobalConfig::default()
    };
    let manager =
        ServerManager::new(config, installers).with_startup_timeout(Duration::from_secs(10));

    let server = manager.get_or_create("a1").await.unwrap();
    assert_eq!(server.state(), ServerState::Ready);
    assert!(server.is_up().await);
    assert!(server.is_running());

    // Warm path returns the same ready instance.
    let again = manager.get_or_create("a1").await.unwrap();
    assert!(Arc::ptr_eq(&server, &again));

    manager.shutdown_all().await;
    assert!(manager.is_empty());
    assert!(!server.is_running());
}
