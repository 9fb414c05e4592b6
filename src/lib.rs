//! Per-account supervisor for Kinesis-compatible mock streaming backends.
//!
//! An emulated streaming-data service runs one independent backend process per
//! account. This crate owns that lifecycle: it lazily launches the right
//! backend for an account, keeps it alive (restarting it if it crashes),
//! routes control operations to it, and tears everything down on shutdown —
//! without leaking processes or ports across accounts.
//!
//! ## Components
//!
//! - [`SupervisedProcess`](process::SupervisedProcess) — one external OS
//!   process with output streaming, a liveness flag, and transparent
//!   auto-restart.
//! - [`MockServer`](server::MockServer) — one account's backend instance; it
//!   knows its ports, persistence file, and how to build the command line and
//!   environment for either engine variant.
//! - [`ServerManager`](manager::ServerManager) — the account → server
//!   registry with a get-or-create fast path and a drain-everything shutdown.
//!
//! The request-handling layer, configuration loading, and the engine
//! installers are external collaborators: callers hand in already-resolved
//! [`GlobalConfig`](config::GlobalConfig) values and
//! [`EngineInstaller`](install::EngineInstaller) implementations.

pub mod config;
pub mod error;
pub mod install;
pub mod manager;
pub mod process;
pub mod server;
pub mod utils;

pub use config::{Engine, GlobalConfig};
pub use error::{Error, Result};
pub use install::{EngineInstaller, EngineInstallers};
pub use manager::ServerManager;
pub use server::{MockServer, ServerSettings, ServerState};
