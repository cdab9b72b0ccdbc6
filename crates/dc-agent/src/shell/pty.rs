//! One shell process attached to a pseudo-terminal

use std::io::{Read, Write};
use std::path::Path;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};

use dc_core::config::AgentConfig;
use dc_core::error::ShellError;
use dc_protocol::TerminalSize;

/// Program and environment used for new shell sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            program: config.resolve_shell(),
            env: config.shell_env.clone(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn validate(&self) -> Result<(), ShellError> {
        let path = Path::new(&self.program);
        if path.is_absolute() && !path.exists() {
            return Err(ShellError::Spawn(format!(
                "shell '{}' does not exist",
                self.program
            )));
        }
        Ok(())
    }
}

/// A running shell and the master side of its pseudo-terminal.
///
/// All methods block on process or terminal I/O and belong on a blocking
/// thread.
pub struct PtyBridge {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<ShellProcess>,
    size: Mutex<TerminalSize>,
    pid: Option<u32>,
}

struct ShellProcess {
    child: Box<dyn Child + Send + Sync>,
    exit: Option<u32>,
}

impl PtyBridge {
    /// Spawn the shell. Returns the bridge and the reader for its output.
    pub fn spawn(
        shell: &ShellCommand,
        size: TerminalSize,
    ) -> Result<(Self, Box<dyn Read + Send>), ShellError> {
        shell.validate()?;

        let PtyPair { master, slave } = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| ShellError::Spawn(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&shell.program);
        for (key, value) in &shell.env {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| ShellError::Spawn(format!("{}: {}", shell.program, e)))?;
        // Only the session's processes keep the slave open, so the reader
        // sees EOF once they are gone
        drop(slave);

        let reader = master
            .try_clone_reader()
            .map_err(|e| ShellError::Spawn(format!("failed to clone PTY reader: {}", e)))?;
        let writer = master
            .take_writer()
            .map_err(|e| ShellError::Spawn(format!("failed to take PTY writer: {}", e)))?;

        let pid = child.process_id();
        tracing::info!("Spawned shell {} with PID {:?}", shell.program, pid);

        let bridge = Self {
            master: Mutex::new(Some(master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(ShellProcess { child, exit: None }),
            size: Mutex::new(size),
            pid,
        };
        Ok((bridge, reader))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> TerminalSize {
        *self.size.lock()
    }

    /// Feed bytes to the shell's input
    pub fn write(&self, data: &[u8]) -> Result<(), ShellError> {
        let mut writer = self.writer.lock();
        let writer = writer
            .as_mut()
            .ok_or_else(|| ShellError::Write("session is closed".to_string()))?;
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| ShellError::Write(e.to_string()))
    }

    pub fn resize(&self, size: TerminalSize) -> Result<(), ShellError> {
        self.master
            .lock()
            .as_ref()
            .ok_or_else(|| ShellError::Resize("session is closed".to_string()))?
            .resize(pty_size(size))
            .map_err(|e| ShellError::Resize(e.to_string()))?;
        *self.size.lock() = size;
        Ok(())
    }

    /// End the session: hang up every process attached to the terminal,
    /// reap the shell and close the master side. Safe to call more than
    /// once; failures are logged.
    pub fn terminate(&self) -> Option<u32> {
        let mut process = self.child.lock();

        if process.exit.is_none() {
            process.exit = match process.child.try_wait() {
                Ok(status) => status.map(|s| s.exit_code()),
                Err(e) => {
                    tracing::warn!("Failed to poll shell {:?}: {}", self.pid, e);
                    None
                }
            };
        }

        // Background jobs outlive the shell and hold the slave open
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            session::hang_up(pid, process.exit.is_none());
        }

        if process.exit.is_none() {
            process.exit = kill_and_reap(process.child.as_mut(), self.pid);
        }
        let exit = process.exit;
        drop(process);

        self.writer.lock().take();
        self.master.lock().take();
        exit
    }
}

fn kill_and_reap(child: &mut (dyn Child + Send + Sync), pid: Option<u32>) -> Option<u32> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status.exit_code());
    }
    if let Err(e) = child.kill() {
        tracing::warn!("Failed to kill shell {:?}: {}", pid, e);
    }
    match child.wait() {
        Ok(status) => Some(status.exit_code()),
        Err(e) => {
            tracing::warn!("Failed to reap shell {:?}: {}", pid, e);
            None
        }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Signalling every process group in a shell's session
#[cfg(unix)]
mod session {
    use std::time::Duration;

    use libc::pid_t;

    /// Time given to SIGHUP before SIGKILL
    const HANGUP_GRACE: Duration = Duration::from_millis(100);

    /// SIGHUP, then SIGKILL, every live process group in the session led
    /// by `sid`. The shell's own group is included while it is running.
    pub(super) fn hang_up(sid: u32, leader_running: bool) {
        let Ok(sid) = pid_t::try_from(sid) else {
            return;
        };
        if sid <= 1 {
            return;
        }

        for (signal, grace) in [(libc::SIGHUP, HANGUP_GRACE), (libc::SIGKILL, Duration::ZERO)] {
            let mut groups = process_groups(sid);
            if leader_running && !groups.contains(&sid) {
                groups.push(sid);
            }
            if groups.is_empty() {
                return;
            }

            for pgid in &groups {
                // SAFETY: kill(2) takes plain integers and touches no memory
                let rc = unsafe { libc::kill(-pgid, signal) };
                if rc != 0 {
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::ESRCH) {
                        tracing::warn!("Failed to signal process group {}: {}", pgid, err);
                    }
                }
            }
            std::thread::sleep(grace);
        }
    }

    /// Process groups with a live member in session `sid`
    #[cfg(target_os = "linux")]
    fn process_groups(sid: pid_t) -> Vec<pid_t> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };

        let mut groups = Vec::new();
        for entry in entries.flatten() {
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
            if !is_pid {
                continue;
            }
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if let Some((state, pgrp, session)) = parse_stat(&stat) {
                if session == sid && state != 'Z' && !groups.contains(&pgrp) {
                    groups.push(pgrp);
                }
            }
        }
        groups
    }

    #[cfg(not(target_os = "linux"))]
    fn process_groups(_sid: pid_t) -> Vec<pid_t> {
        Vec::new()
    }

    /// `(state, pgrp, session)` from a `/proc/<pid>/stat` line. The command
    /// name may hold spaces and parentheses, so fields start after the last `)`.
    #[cfg(target_os = "linux")]
    pub(super) fn parse_stat(stat: &str) -> Option<(char, pid_t, pid_t)> {
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace();
        let state = fields.next()?.chars().next()?;
        let _ppid = fields.next()?;
        let pgrp = fields.next()?.parse().ok()?;
        let session = fields.next()?.parse().ok()?;
        Some((state, pgrp, session))
    }
}
