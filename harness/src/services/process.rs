//! Child process handling for the embedded servers
//!
//! Servers are spawned with piped output that is forwarded line by line into
//! the debug log, and are stopped with SIGTERM before falling back to a kill.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use shared::{component_debug, component_warn, Component};

use crate::error::{HarnessError, HarnessResult};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

pub struct ManagedProcess {
    component: Component,
    child: Child,
    pid: Option<u32>,
}

impl ManagedProcess {
    /// Spawn `program` with `args`; the child is killed if the handle is dropped
    pub fn spawn(component: Component, program: &str, args: &[String]) -> HarnessResult<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| HarnessError::lifecycle(component, format!("failed to spawn {program}: {e}")))?;
        let pid = child.id();

        component_debug!(component, "🚀 Spawned {} (pid {:?})", program, pid);
        Ok(Self {
            component,
            child: forward_output(component, child),
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the child has terminated, checked without blocking
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the child to terminate, killing it if it outlives `grace`
    pub async fn stop(mut self, grace: Duration) -> HarnessResult<()> {
        if self.has_exited() {
            component_debug!(self.component, "✅ Process already gone");
            return Ok(());
        }

        self.terminate();

        let exited = tokio::time::timeout(grace, self.child.wait()).await;
        match exited {
            Ok(Ok(status)) => {
                component_debug!(self.component, "🛑 Process exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(HarnessError::lifecycle(self.component, e)),
            Err(_) => {
                component_warn!(
                    self.component,
                    "🔨 Process didn't respond to SIGTERM within {:?}, killing",
                    grace
                );
                self.child
                    .kill()
                    .await
                    .map_err(|e| HarnessError::lifecycle(self.component, e))
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => component_debug!(self.component, "📤 Sent SIGTERM to {}", pid),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => component_warn!(self.component, "⚠️ SIGTERM to {} failed: {}", pid, e),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Drain stdout/stderr into the debug log so the child never blocks on a full pipe
fn forward_output(component: Component, mut child: Child) -> Child {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                component_debug!(component, "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                component_debug!(component, "{}", line);
            }
        });
    }

    child
}
