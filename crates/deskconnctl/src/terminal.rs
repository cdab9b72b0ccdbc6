//! Local terminal handling for the shell bridge

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use dc_protocol::TerminalSize;

/// Keeps the local terminal in raw mode for its lifetime.
///
/// The previous mode is restored when the guard is dropped, which covers
/// normal return, `?` propagation and unwinding panics.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("Failed to put terminal into raw mode")?;
        Ok(Self { active: true })
    }

    /// Restore the terminal now instead of at drop
    pub fn restore(&mut self) {
        if std::mem::take(&mut self.active) {
            if let Err(e) = disable_raw_mode() {
                tracing::warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Current size of the local terminal, or 80x24 when it cannot be read
pub fn current_size() -> TerminalSize {
    match crossterm::terminal::size() {
        Ok((cols, rows)) => TerminalSize::new(rows, cols),
        Err(e) => {
            tracing::debug!("Could not read terminal size: {}", e);
            TerminalSize::default_size()
        }
    }
}

/// Resize directive for the local terminal's current size
pub fn size_directive() -> Vec<u8> {
    current_size().to_directive().into_bytes()
}

/// Signals the shell bridge reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// The local terminal changed size
    Resize,
    /// The process is being asked to stop
    Terminate,
}

/// OS signal listeners installed for the duration of a shell session
#[cfg(unix)]
pub struct SessionSignals {
    winch: tokio::signal::unix::Signal,
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SessionSignals {
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            winch: signal(SignalKind::window_change()).context("Failed to watch SIGWINCH")?,
            term: signal(SignalKind::terminate()).context("Failed to watch SIGTERM")?,
            hup: signal(SignalKind::hangup()).context("Failed to watch SIGHUP")?,
            int: signal(SignalKind::interrupt()).context("Failed to watch SIGINT")?,
        })
    }

    pub async fn recv(&mut self) -> SessionSignal {
        tokio::select! {
            _ = self.winch.recv() => SessionSignal::Resize,
            _ = self.term.recv() => SessionSignal::Terminate,
            _ = self.hup.recv() => SessionSignal::Terminate,
            _ = self.int.recv() => SessionSignal::Terminate,
        }
    }
}

#[cfg(not(unix))]
pub struct SessionSignals;

#[cfg(not(unix))]
impl SessionSignals {
    pub fn install() -> Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> SessionSignal {
        let _ = tokio::signal::ctrl_c().await;
        SessionSignal::Terminate
    }
}
