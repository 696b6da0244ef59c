// src/core/roles/process.rs

//! A small supervisor for one external service process.
//!
//! Roles own one supervisor per binary they manage. Stopping is graceful:
//! SIGINT first, SIGKILL when the process is still alive after the grace
//! period. Restarting crashed processes is the caller's decision, made
//! from the role reconcile loop.

use crate::core::errors::ClusterError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{info, warn};

/// How long a process gets to exit after SIGINT before it is killed.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Supervises a single external process.
pub struct ProcessSupervisor {
    spec: ProcessSpec,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("program", &self.spec.program)
            .finish()
    }
}

impl ProcessSupervisor {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            child: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &str {
        &self.spec.program
    }

    /// Starts the process if it is not already running. Idempotent.
    pub async fn start(&self) -> Result<(), ClusterError> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait().map_err(ClusterError::from)?.is_none() {
                return Ok(());
            }
            // Previous instance exited; fall through and respawn.
        }

        info!("Starting {} {}", self.spec.program, self.spec.args.join(" "));
        let child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClusterError::Role(format!("failed to start {}: {e}", self.spec.program))
            })?;
        *guard = Some(child);
        Ok(())
    }

    /// Whether the process is currently alive.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Restarts the process when it has exited. Returns whether a restart
    /// happened.
    pub async fn ensure_running(&self) -> Result<bool, ClusterError> {
        if self.is_running().await {
            return Ok(false);
        }
        let was_started = self.child.lock().await.is_some();
        if was_started {
            warn!("{} exited; restarting", self.spec.program);
        }
        self.start().await?;
        Ok(was_started)
    }

    /// Graceful stop: SIGINT, then SIGKILL after the grace period.
    pub async fn stop(&self) -> Result<(), ClusterError> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        if child.try_wait().map_err(ClusterError::from)?.is_some() {
            return Ok(());
        }

        info!("Stopping {}", self.spec.program);
        signal_child(&child, libc::SIGINT);
        match time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                info!("{} exited with {status}", self.spec.program);
            }
            Ok(Err(e)) => {
                warn!("Failed waiting for {}: {e}", self.spec.program);
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}; killing",
                    self.spec.program, GRACEFUL_STOP_TIMEOUT
                );
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    /// Asks the process to reload its configuration (SIGHUP).
    pub async fn signal_reload(&self) {
        let guard = self.child.lock().await;
        if let Some(child) = guard.as_ref() {
            signal_child(child, libc::SIGHUP);
        }
    }
}

#[cfg(unix)]
fn signal_child(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        // SAFETY: sending a signal to a pid we own.
        unsafe {
            libc::kill(pid as i32, signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_child(_child: &Child, _signal: i32) {}
