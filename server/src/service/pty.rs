//! PTY service
//!
//! A [`TerminalSession`] is one long-lived shell attached to a pseudo-terminal.
//! The API is blocking; async callers drive it from `spawn_blocking`. One
//! reader and one writer may use a session concurrently with `resize` and
//! `close`.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::types::TerminalSize;
use crate::error::{Error, Result};

/// Shell started when the caller does not name one
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Options for opening a terminal session
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Shell binary, [`DEFAULT_SHELL`] when empty
    pub shell: String,
    pub workdir: PathBuf,
    /// Merged over the server's environment
    pub env: HashMap<String, String>,
    pub size: TerminalSize,
}

impl TerminalOptions {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            workdir: workdir.into(),
            env: HashMap::new(),
            size: TerminalSize::default(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

struct SessionState {
    closed: bool,
    /// The shell was reaped; its pid may already belong to someone else
    reaped: bool,
    master: Option<Box<dyn MasterPty + Send>>,
    size: TerminalSize,
}

/// A live shell behind a pseudo-terminal
pub struct TerminalSession {
    id: String,
    pid: Option<u32>,
    state: Mutex<SessionState>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl TerminalSession {
    /// Spawn the shell with the PTY as its controlling terminal
    pub fn open(options: TerminalOptions) -> Result<Self> {
        match std::fs::metadata(&options.workdir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::InvalidWorkingDirectory(format!(
                    "{} is not a directory",
                    options.workdir.display()
                )))
            }
            Err(e) => {
                return Err(Error::InvalidWorkingDirectory(format!(
                    "{}: {}",
                    options.workdir.display(),
                    e
                )))
            }
        }

        let shell = if options.shell.is_empty() {
            DEFAULT_SHELL
        } else {
            options.shell.as_str()
        };

        let pair = native_pty_system()
            .openpty(pty_size(options.size))
            .map_err(pty_error)?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(&options.workdir);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", shell, e)))?;
        // Only the shell keeps the slave open, so its exit surfaces as EOF
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(pty_error)?;
        let writer = pair.master.take_writer().map_err(pty_error)?;
        let pid = child.process_id();

        let id = Uuid::new_v4().to_string();
        info!(
            "Opened terminal {} ({} in {}, pid {:?}, {}x{})",
            id,
            shell,
            options.workdir.display(),
            pid,
            options.size.cols,
            options.size.rows
        );

        Ok(Self {
            id,
            pid,
            state: Mutex::new(SessionState {
                closed: false,
                reaped: false,
                master: Some(pair.master),
                size: options.size,
            }),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> TerminalSize {
        lock(&self.state).size
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Blocking read of raw terminal output. `Ok(0)` once the shell is gone.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::PtyAlreadyClosed);
        }

        let mut reader = lock(&self.reader);
        loop {
            match reader.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports a hung-up slave as EIO rather than EOF
                Err(e) if is_eio(&e) => return Ok(0),
                Err(e) => return Err(Error::PtyIo(e)),
            }
        }
    }

    /// Blocking write of raw input
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::PtyAlreadyClosed);
        }

        let mut writer = lock(&self.writer);
        writer.write_all(data).map_err(Error::PtyIo)?;
        writer.flush().map_err(Error::PtyIo)?;
        Ok(data.len())
    }

    /// Update the window size so full-screen programs reflow
    pub fn resize(&self, size: TerminalSize) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(Error::PtyAlreadyClosed);
        }

        if let Some(master) = state.master.as_ref() {
            master.resize(pty_size(size)).map_err(pty_error)?;
        }
        state.size = size;
        debug!("Resized terminal {} to {}x{}", self.id, size.cols, size.rows);
        Ok(())
    }

    /// Signal the shell and release the PTY. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let (master, reaped) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (state.master.take(), state.reaped)
        };

        if let (Some(pid), false) = (self.pid, reaped) {
            signal_shell(pid);
        }
        drop(master);

        info!("Closed terminal {}", self.id);
        Ok(())
    }

    /// Block until the shell exits and return its exit code
    pub fn wait(&self) -> Result<u32> {
        let mut child = lock(&self.child);
        let status = child.wait().map_err(Error::PtyIo)?;
        lock(&self.state).reaped = true;
        Ok(status.exit_code())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close terminal {} on drop: {}", self.id, e);
        }
    }
}

/// Interactive bash ignores SIGTERM, so the foreground group is also hung up
#[cfg(unix)]
fn signal_shell(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        debug!("SIGTERM to shell {} failed: {}", pid, e);
    }
    if let Err(e) = killpg(pid, Signal::SIGHUP) {
        debug!("SIGHUP to process group {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn signal_shell(_pid: u32) {}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn pty_error(err: anyhow::Error) -> Error {
    Error::PtyIo(io::Error::other(err.to_string()))
}

fn is_eio(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
