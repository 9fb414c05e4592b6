//! Supervised external processes.
//!
//! A [`SupervisedProcess`] owns one long-running child process and the
//! background task driving it: spawn, stream output line by line, watch for
//! exit, and relaunch with the identical command and environment when the
//! exit was unexpected. Termination is explicit and final; the restart loop
//! never resurrects a process that was asked to stop.
//!
//! Restarts are transparent to the owner: the handle stays valid, only the
//! [`is_alive`](SupervisedProcess::is_alive) flag dips while the child is
//! down. "Alive" is a distinct signal from "ready" — readiness is probed at
//! the instance level, not here.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before relaunching a crashed (or unlaunchable) process.
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Callback invoked for every output line, trailing whitespace stripped.
pub type LineListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything needed to launch and supervise one child process.
pub struct ProcessSpec {
    /// Name used in log lines.
    pub name: String,
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Environment variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Relaunch on unexpected exit.
    pub auto_restart: bool,
    /// Receives stdout/stderr lines; defaults to info-level logging.
    pub log_listener: Option<LineListener>,
}

/// Handle to a supervised child process.
///
/// Created and started together via [`SupervisedProcess::spawn`]; must be
/// created inside a tokio runtime. Dropping the handle stops the supervision
/// loop and kills the child.
pub struct SupervisedProcess {
    name: String,
    alive: Arc<AtomicBool>,
    restarts: Arc<AtomicU32>,
    stop_tx: watch::Sender<bool>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SupervisedProcess {
    /// Launch the process and the supervision loop driving it.
    #[must_use]
    pub fn spawn(spec: ProcessSpec) -> Self {
        let name = spec.name.clone();
        let alive = Arc::new(AtomicBool::new(false));
        let restarts = Arc::new(AtomicU32::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(supervise(
            spec,
            alive.clone(),
            restarts.clone(),
            stop_rx,
        ));

        Self {
            name,
            alive,
            restarts,
            stop_tx,
            supervisor: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Whether the child process is currently running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// How many times the child has been relaunched.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Stop the supervision loop, kill the child, and wait for both.
    ///
    /// Safe to call more than once; the process is never restarted after
    /// this returns.
    pub async fn terminate(&self) {
        debug!(process = %self.name, "terminating supervised process");
        let _ = self.stop_tx.send(true);
        let task = self.supervisor.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        // Unblocks the supervision loop, which kills the child on its way out.
        let _ = self.stop_tx.send(true);
    }
}

async fn supervise(
    spec: ProcessSpec,
    alive: Arc<AtomicBool>,
    restarts: Arc<AtomicU32>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let ProcessSpec {
        name,
        program,
        args,
        env,
        auto_restart,
        log_listener,
    } = spec;

    let mut first_launch = true;
    loop {
        if *stop_rx.borrow() {
            break;
        }
        if !first_launch {
            restarts.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                () = tokio::time::sleep(RESTART_DELAY) => {},
                _ = stop_rx.changed() => break,
            }
            if *stop_rx.borrow() {
                break;
            }
        }
        first_launch = false;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(process = %name, program = %program, error = %e, "failed to launch process");
                if !auto_restart {
                    break;
                }
                continue;
            },
        };

        alive.store(true, Ordering::SeqCst);
        debug!(process = %name, pid = ?child.id(), "process launched");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_lines(name.clone(), stdout, log_listener.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_lines(name.clone(), stderr, log_listener.clone()));
        }

        tokio::select! {
            status = child.wait() => {
                alive.store(false, Ordering::SeqCst);
                if *stop_rx.borrow() {
                    break;
                }
                if !auto_restart {
                    info!(process = %name, ?status, "process exited");
                    break;
                }
                warn!(
                    process = %name,
                    ?status,
                    restarts = restarts.load(Ordering::Relaxed),
                    "process exited unexpectedly, restarting"
                );
            },
            _ = stop_rx.changed() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                alive.store(false, Ordering::SeqCst);
                break;
            },
        }
    }
    alive.store(false, Ordering::SeqCst);
    debug!(process = %name, "supervision loop stopped");
}

/// Forward output lines to the listener (or the log), trailing whitespace
/// stripped.
async fn stream_lines<R>(name: String, reader: R, listener: Option<LineListener>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        match &listener {
            Some(listener) => listener(line),
            None => info!(process = %name, "{line}"),
        }
    }
}
