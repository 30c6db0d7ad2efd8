//! One supervised external process.
//!
//! stdin is always a pipe the harness writes line commands into. stdout and
//! stderr either go to the null device or share one pseudo-terminal whose
//! master end is read by a background thread, so programs that only flush
//! promptly when attached to a terminal still surface their logs.

use camino::Utf8Path;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::pty::openpty;
use snowstorm_core::config::OutputCapture;
use snowstorm_core::error::{HarnessError, Result};
use std::ffi::OsStr;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// A chatty process cannot hold `drain_output` for more than this many quiet windows.
const DRAIN_WINDOWS: u32 = 10;

/// Upper bound on chunks forwarded by one `drain_pending` call
const PENDING_CHUNKS: usize = 256;

pub struct ManagedProcess {
    label: String,
    child: Child,
    stdin: Option<ChildStdin>,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    partial_line: Vec<u8>,
    exit_status: Option<ExitStatus>,
    killed: bool,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("label", &self.label)
            .field("pid", &self.child.id())
            .field("stdin_open", &self.stdin.is_some())
            .field("capturing", &self.output.is_some())
            .field("exit_status", &self.exit_status)
            .field("killed", &self.killed)
            .finish_non_exhaustive()
    }
}

impl ManagedProcess {
    /// Launches `program` with `args`.
    ///
    /// Fails with [`HarnessError::Spawn`] when the executable is missing or
    /// cannot be started.
    pub fn spawn<I, S>(
        label: impl Into<String>,
        program: &Utf8Path,
        args: I,
        capture: OutputCapture,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let label = label.into();
        let spawn_error = |source: std::io::Error| HarnessError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut cmd = Command::new(program.as_std_path());
        cmd.args(args).stdin(Stdio::piped()).kill_on_drop(true);

        let master = match capture {
            OutputCapture::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
            OutputCapture::Pty => {
                let pty = openpty(None, None).map_err(|e| spawn_error(e.into()))?;
                // keep other children spawned meanwhile from holding the terminal open
                for fd in [&pty.master, &pty.slave] {
                    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                        .map_err(|e| spawn_error(e.into()))?;
                }
                let stderr = pty.slave.try_clone().map_err(spawn_error)?;
                cmd.stdout(Stdio::from(pty.slave)).stderr(Stdio::from(stderr));
                Some(pty.master)
            }
        };

        let mut child = cmd.spawn().map_err(spawn_error)?;
        // The command still holds our copies of the slave; the reader only sees
        // EOF once the child's copies are the last ones.
        drop(cmd);

        let stdin = child.stdin.take();
        let output = match master {
            Some(master) => Some(spawn_reader(&label, master).map_err(spawn_error)?),
            None => None,
        };

        debug!("Spawned {} (pid {:?}): {}", label, child.id(), program);

        Ok(Self {
            label,
            child,
            stdin,
            output,
            partial_line: Vec::new(),
            exit_status: None,
            killed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking liveness check.
    ///
    /// Reports false once the process has exited or was killed through this
    /// handle.
    pub fn is_alive(&mut self) -> bool {
        if self.killed || self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} exited: {}", self.label, status);
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to poll {}: {}", self.label, e);
                false
            }
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Writes `text` plus a newline to stdin and flushes.
    ///
    /// A closed input yields [`HarnessError::BrokenPipe`]; the write is not
    /// retried and the input stays closed afterwards.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(HarnessError::BrokenPipe(self.label.clone()));
        };

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(HarnessError::BrokenPipe(self.label.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forwards captured output to the log until nothing arrives for `quiet`.
    ///
    /// Returns the number of bytes forwarded. Without a pseudo-terminal this
    /// returns immediately.
    pub async fn drain_output(&mut self, quiet: Duration) -> usize {
        let Some(rx) = self.output.as_mut() else {
            return 0;
        };

        let deadline = Instant::now() + quiet * DRAIN_WINDOWS;
        let mut drained = 0;
        let mut closed = false;

        while Instant::now() < deadline {
            match timeout(quiet, rx.recv()).await {
                Ok(Some(chunk)) => {
                    drained += chunk.len();
                    forward_output(&self.label, &mut self.partial_line, &chunk);
                }
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if !self.partial_line.is_empty() {
            let rest = std::mem::take(&mut self.partial_line);
            log_line(&self.label, &rest);
        }
        if closed {
            self.output = None;
        }
        drained
    }

    /// Forwards only what the reader thread has already buffered.
    pub fn drain_pending(&mut self) -> usize {
        let Some(rx) = self.output.as_mut() else {
            return 0;
        };

        let mut drained = 0;
        let mut closed = false;
        for _ in 0..PENDING_CHUNKS {
            match rx.try_recv() {
                Ok(chunk) => {
                    drained += chunk.len();
                    forward_output(&self.label, &mut self.partial_line, &chunk);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            self.output = None;
        }
        drained
    }

    /// Closes stdin, signalling EOF to the process.
    pub fn close_input(&mut self) {
        self.stdin = None;
    }

    /// Waits up to `grace` for the process to exit on its own.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Some(status);
        }
        self.close_input();
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for {}: {}", self.label, e);
                None
            }
            Err(_) => None,
        }
    }

    /// Forcibly terminates the process and releases its streams.
    ///
    /// Does not wait for the exit to be observed. Safe to call repeatedly.
    pub fn kill(&mut self) {
        if self.is_alive() {
            match self.child.start_kill() {
                Ok(()) => debug!("Killed {}", self.label),
                Err(e) => debug!("Kill of {} failed: {}", self.label, e),
            }
        }
        self.killed = true;
        self.stdin = None;
        self.output = None;
        self.partial_line.clear();
    }
}

fn spawn_reader(label: &str, master: OwnedFd) -> std::io::Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut master = std::fs::File::from(master);

    std::thread::Builder::new()
        .name(format!("{label}-output"))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match master.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // EIO once every slave descriptor is closed
                    Err(_) => break,
                }
            }
        })?;

    Ok(rx)
}

fn forward_output(label: &str, partial: &mut Vec<u8>, chunk: &[u8]) {
    partial.extend_from_slice(chunk);
    while let Some(newline) = partial.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = partial.drain(..=newline).collect();
        log_line(label, &line);
    }
}

fn log_line(label: &str, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);
    if !text.is_empty() {
        info!(target: "snowstorm::output", process = %label, "{}", text);
    }
}
