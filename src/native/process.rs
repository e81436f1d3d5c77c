//! Native helper process spawning and ownership.

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::HelperFailure;

// ============================================================================
// ProcessGuard
// ============================================================================

/// Owns a helper process and kills it when dropped.
pub(crate) struct ProcessGuard {
    child: Option<Child>,
    pid: u32,
}

/// Pipes of a freshly spawned helper.
pub(crate) struct HelperPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ProcessGuard {
    /// Spawns `executable` with `origin` as its only argument.
    ///
    /// The helper runs in its own directory with piped stdin/stdout;
    /// stderr is inherited.
    pub fn spawn(executable: &Path, origin: &str) -> Result<(Self, HelperPipes), HelperFailure> {
        let mut command = Command::new(executable);
        command
            .arg(origin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| HelperFailure::SpawnFailed(e.to_string()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(HelperFailure::SpawnFailed("helper pipes unavailable".to_string()));
        };

        let pid = child.id().unwrap_or(0);
        info!(pid, executable = %executable.display(), "Native host started");

        Ok((
            Self {
                child: Some(child),
                pid,
            },
            HelperPipes { stdin, stdout },
        ))
    }

    /// Kills the process and waits for it to exit.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(pid = self.pid, error = %e, "Failed to kill native host");
            }
            info!(pid = self.pid, "Native host terminated");
        }
    }

    /// Waits for the process to exit on its own and describes how it ended.
    pub async fn wait(&mut self) -> String {
        let Some(child) = self.child.as_mut() else {
            return "already terminated".to_string();
        };
        match child.wait().await {
            Ok(status) => {
                info!(pid = self.pid, %status, "Native host exited");
                self.child = None;
                status.to_string()
            }
            Err(e) => e.to_string(),
        }
    }

    /// Returns the process ID.
    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}
