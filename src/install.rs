//! Collaborator seam for engine installation.
//!
//! Fetching, verifying, and caching backend executables belongs to the
//! packaging layer; the supervisor only needs an idempotent `install` step
//! and the resulting executable path. Each engine variant gets its own
//! installer implementation, handed in at [`ServerManager`] construction.
//!
//! [`ServerManager`]: crate::manager::ServerManager

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Engine;
use crate::error::Result;

/// Installs one engine variant on the host and locates its artifacts.
#[async_trait]
pub trait EngineInstaller: Send + Sync {
    /// Ensure the engine is installed. Idempotent; a failure to fetch or
    /// verify the artifact surfaces as [`Error::Installation`].
    ///
    /// [`Error::Installation`]: crate::error::Error::Installation
    async fn install(&self) -> Result<()>;

    /// Path to the installed executable (a jar for the VM-hosted engine, a
    /// script entry point for the script-hosted one).
    fn executable_path(&self) -> PathBuf;

    /// Extra environment the installed runtime needs at launch (e.g. a
    /// located `JAVA_HOME`). Empty for engines without a managed runtime.
    fn runtime_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// The installers for both engine variants.
#[derive(Clone)]
pub struct EngineInstallers {
    node: Arc<dyn EngineInstaller>,
    scala: Arc<dyn EngineInstaller>,
}

impl EngineInstallers {
    /// Bundle the per-engine installers.
    pub fn new(node: Arc<dyn EngineInstaller>, scala: Arc<dyn EngineInstaller>) -> Self {
        Self { node, scala }
    }

    /// Installer for the given engine.
    #[must_use]
    pub fn get(&self, engine: Engine) -> &Arc<dyn EngineInstaller> {
        match engine {
            Engine::Node => &self.node,
            Engine::Scala => &self.scala,
        }
    }
}
