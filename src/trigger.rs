use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::WatcherConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shutdown,
    Reboot,
}

impl Action {
    pub fn command(&self) -> &'static str {
        match self {
            Action::Shutdown => "shutdown -h now",
            Action::Reboot => "reboot",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Shutdown => f.write_str("Shutdown"),
            Action::Reboot => f.write_str("Reboot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    GpioPress { line: u32 },
    ShutdownFile(PathBuf),
    RebootFile(PathBuf),
}

impl Trigger {
    pub fn action(&self) -> Action {
        match self {
            Trigger::GpioPress { .. } | Trigger::ShutdownFile(_) => Action::Shutdown,
            Trigger::RebootFile(_) => Action::Reboot,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::GpioPress { line } => write!(f, "GPIO{line}"),
            Trigger::ShutdownFile(p) | Trigger::RebootFile(p) => write!(f, "'{}'", p.display()),
        }
    }
}

pub struct FileTriggerMonitor {
    shutdown_file: PathBuf,
    reboot_file: PathBuf,
    stuck: HashSet<PathBuf>, // semaphores whose removal failure was already reported
}

impl FileTriggerMonitor {
    pub fn new(shutdown_file: PathBuf, reboot_file: PathBuf) -> Self {
        Self {
            shutdown_file,
            reboot_file,
            stuck: HashSet::new(),
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.shutdown_file.clone(), config.reboot_file.clone())
    }

    /// Consumes at most one semaphore, shutdown first.
    pub fn poll(&mut self) -> Option<Trigger> {
        self.check(Action::Shutdown)
            .or_else(|| self.check(Action::Reboot))
    }

    /// Consumes only the semaphore belonging to `action`.
    pub fn check(&mut self, action: Action) -> Option<Trigger> {
        let path = match action {
            Action::Shutdown => self.shutdown_file.clone(),
            Action::Reboot => self.reboot_file.clone(),
        };
        if !self.consume(&path) {
            return None;
        }

        info!("{action} requested by presence of {}.", path.display());
        Some(match action {
            Action::Shutdown => Trigger::ShutdownFile(path),
            Action::Reboot => Trigger::RebootFile(path),
        })
    }

    /// Removes semaphores left over from before startup without firing them.
    pub fn clear_stale(&mut self) {
        for path in [self.shutdown_file.clone(), self.reboot_file.clone()] {
            if self.consume(&path) {
                info!("Startup: Deleted '{}'.", path.display());
            }
        }
    }

    /// True while `path` exists but cannot be removed.
    pub fn is_stuck(&self, path: &Path) -> bool {
        self.stuck.contains(path)
    }

    // Deletion happens before anything else so a semaphore fires at most once.
    fn consume(&mut self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {
                self.stuck.remove(path);
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.stuck.remove(path);
                false
            }
            Err(e) => {
                if self.stuck.insert(path.to_path_buf()) {
                    warn!("Failed to remove semaphore {}: {e}", path.display());
                } else {
                    debug!("Semaphore {} still not removable: {e}", path.display());
                }
                false
            }
        }
    }
}
