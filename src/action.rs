use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::WatchError;
use crate::gpio::EventHandler;
use crate::trigger::Trigger;

pub trait CommandRunner: Send + Sync {
    /// Starts `sh -c script` without waiting for it.
    fn spawn_detached(&self, script: &str) -> io::Result<()>;
}

/// Runs the script in its own session with all standard streams on /dev/null,
/// so it outlives the watcher.
pub struct DetachedShell;

impl CommandRunner for DetachedShell {
    fn spawn_detached(&self, script: &str) -> io::Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // SAFETY: setsid is async-signal-safe and only touches the child.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(drop)
                    .map_err(io::Error::from)
            });
        }
        cmd.spawn().map(drop)
    }
}

pub struct ActionInitiator<R: CommandRunner> {
    debug: bool,
    delay_secs: u64,
    runner: R,
}

impl<R: CommandRunner> ActionInitiator<R> {
    pub fn new(debug: bool, delay_secs: u64, runner: R) -> Self {
        Self {
            debug,
            delay_secs,
            runner,
        }
    }

    pub fn script_for(&self, trigger: &Trigger) -> String {
        format!(
            "sleep {} && {}",
            self.delay_secs,
            trigger.action().command()
        )
    }

    pub fn initiate(
        &self,
        trigger: &Trigger,
        gpio: Option<&EventHandler>,
    ) -> Result<(), WatchError> {
        let action = trigger.action();

        if self.debug {
            let source = match trigger {
                Trigger::GpioPress { .. } => "GPIO event".to_string(),
                other => other.to_string(),
            };
            debug!("Debug mode active: {action} prevented by {source}.");
            if let Some(handler) = gpio {
                handler.rearm();
            }
            return Ok(());
        }

        if let Trigger::GpioPress { line } = trigger {
            info!("Shutdown initiated by pin GPIO{line}. Disabling callback.");
        }
        if let Some(handler) = gpio {
            handler.disarm();
        }

        self.runner
            .spawn_detached(&self.script_for(trigger))
            .map_err(|e| WatchError::Spawn(e.to_string()))?;
        info!("{action} process initiated by {trigger}.");

        Ok(())
    }
}
