use std::io::{self, IsTerminal};
use std::os::fd::AsFd;

use log::{debug, warn};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::error::WatchError;

/// Keeps `^C` from being echoed while the watcher owns the terminal.
///
/// The original settings come back when the guard drops, which covers normal
/// return, error exits and unwinding.
pub struct TerminalGuard {
    original: Option<Termios>,
}

impl TerminalGuard {
    pub fn suppress_ctrl_echo() -> Self {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Self { original: None };
        }

        match Self::disable_echoctl(&stdin) {
            Ok(original) => Self {
                original: Some(original),
            },
            Err(e) => {
                warn!("Failed to disable Ctrl+C echo: {e}");
                Self { original: None }
            }
        }
    }

    fn disable_echoctl<F: AsFd>(fd: &F) -> Result<Termios, WatchError> {
        let original =
            termios::tcgetattr(fd.as_fd()).map_err(|e| WatchError::Terminal(e.to_string()))?;
        let mut quiet = original.clone();
        quiet.local_flags.remove(LocalFlags::ECHOCTL);
        termios::tcsetattr(fd.as_fd(), SetArg::TCSADRAIN, &quiet)
            .map_err(|e| WatchError::Terminal(e.to_string()))?;
        Ok(original)
    }

    /// Puts the saved settings back. Safe to call more than once.
    pub fn restore(&mut self) {
        let Some(original) = self.original.take() else {
            return;
        };
        let stdin = io::stdin();
        match termios::tcsetattr(stdin.as_fd(), SetArg::TCSADRAIN, &original) {
            Ok(()) => debug!("Terminal settings restored."),
            Err(e) => warn!("Failed to restore terminal settings: {e}"),
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
