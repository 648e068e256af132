//! Process group supervision
//!
//! Every command is spawned as the leader of its own process group, so killing
//! the group reaches every descendant. [`RunningProcess`] owns the child and
//! drives its lifecycle through the [`RunState`] machine.

use std::io;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::{debug, warn};

/// Exit code reported for a run whose deadline expired
pub const EXIT_CODE_TIMEOUT: i32 = -1;

/// Exit code reported when no status could be observed
pub const EXIT_CODE_UNKNOWN: i32 = -2;

/// Shell convention for "killed by signal N"
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// Lifecycle of a supervised process.
///
/// `Running` moves to `Exited` when the process finishes on its own, or to
/// `TimedOut` and then `Terminated` when the deadline wins the race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Exited { code: i32 },
    TimedOut,
    Terminated,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Exited { .. } | RunState::Terminated | RunState::Failed(_)
        )
    }
}

/// A live child process and its process group
pub struct RunningProcess {
    child: Child,
    pgid: Option<i32>,
    state: RunState,
}

impl RunningProcess {
    /// Take ownership of a child spawned with `process_group(0)`
    pub fn new(child: Child) -> Self {
        let pgid = child.id().map(|pid| pid as i32);
        Self {
            child,
            pgid,
            state: RunState::Running,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.pgid.map(|pgid| pgid as u32)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the process without a deadline
    pub async fn wait(&mut self) -> &RunState {
        self.state = match self.child.wait().await {
            Ok(status) => RunState::Exited {
                code: exit_code(status),
            },
            Err(e) => RunState::Failed(e.to_string()),
        };
        &self.state
    }

    /// Race process exit against `timeout`, terminating the group if the timer wins
    pub async fn wait_with_deadline(&mut self, timeout: Option<Duration>) -> &RunState {
        let Some(limit) = timeout else {
            return self.wait().await;
        };

        match tokio::time::timeout(limit, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.state = RunState::Exited {
                    code: exit_code(status),
                };
            }
            Ok(Err(e)) => {
                self.state = RunState::Failed(e.to_string());
            }
            Err(_) => self.expire().await,
        }
        &self.state
    }

    /// The deadline won: mark the run timed out, then terminate it
    pub async fn expire(&mut self) {
        self.state = RunState::TimedOut;
        self.terminate().await;
    }

    /// Kill the whole group and reap the leader
    pub async fn terminate(&mut self) {
        if let Some(pgid) = self.pgid {
            debug!("Killing process group {}", pgid);
            if let Err(e) = kill_process_group(pgid) {
                warn!("Failed to kill process group {}: {}", pgid, e);
            }
        }
        // The leader may have left the group; make sure it goes too
        let _ = self.child.start_kill();
        if let Err(e) = self.child.wait().await {
            warn!("Failed to reap terminated process: {}", e);
        }
        self.state = RunState::Terminated;
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        // Dropped mid-run, e.g. the request future was cancelled
        if let Some(pgid) = self.pgid {
            debug!("Reclaiming abandoned process group {}", pgid);
            if let Err(e) = kill_process_group(pgid) {
                warn!("Failed to kill abandoned process group {}: {}", pgid, e);
            }
        }
    }
}

/// Translate an exit status into a numeric code
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
    }

    EXIT_CODE_UNKNOWN
}

/// Send SIGKILL to every process in the group. A group that is already gone is not an error.
#[cfg(unix)]
pub fn kill_process_group(pgid: i32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pgid: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Whether any process in the group is still alive (zombies included)
#[cfg(unix)]
pub fn process_group_exists(pgid: i32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pgid), None).is_ok()
}

#[cfg(not(unix))]
pub fn process_group_exists(_pgid: i32) -> bool {
    false
}
