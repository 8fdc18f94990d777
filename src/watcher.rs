use std::future::Future;
use std::io;
use std::sync::Arc;

use log::{debug, info};
use nix::sys::signal::Signal;
use nix::unistd::Uid;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::action::{ActionInitiator, CommandRunner};
use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::gpio::{GpioBackend, GpioMonitor, GpioWatch};
use crate::trigger::{Action, FileTriggerMonitor, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Polling,
    Triggered,
    ActionInitiated,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Signal(Signal),
    Completed,
}

impl Exit {
    /// Every handled signal is a clean exit, SIGINT included.
    pub fn code(&self) -> u8 {
        match self {
            Exit::Signal(_) | Exit::Completed => 0,
        }
    }
}

pub fn ensure_privileged(euid: Uid) -> Result<(), WatchError> {
    if euid.is_root() {
        Ok(())
    } else {
        Err(WatchError::Privilege(
            "this program must be run as root".into(),
        ))
    }
}

/// Resolves with the first of SIGINT, SIGTERM or SIGHUP.
///
/// Handlers are installed when this is called, not when the future is polled.
pub fn termination_signal() -> io::Result<impl Future<Output = Signal>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => Signal::SIGINT,
            _ = sigterm.recv() => Signal::SIGTERM,
            _ = sighup.recv() => Signal::SIGHUP,
        }
    })
}

pub struct Watcher<B: GpioBackend, R: CommandRunner> {
    config: Arc<WatcherConfig>,
    files: FileTriggerMonitor,
    initiator: ActionInitiator<R>,
    gpio: Option<GpioWatch<B>>,
    trigger_rx: mpsc::UnboundedReceiver<Trigger>,
    state: WatchState,
}

impl<B: GpioBackend, R: CommandRunner> Watcher<B, R> {
    pub fn new(config: Arc<WatcherConfig>, backend: Arc<B>, runner: R) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        let gpio = config
            .gpio
            .as_ref()
            .and_then(|pin| GpioMonitor::new(backend).start_or_skip(pin, trigger_tx));

        Self {
            files: FileTriggerMonitor::from_config(&config),
            initiator: ActionInitiator::new(config.debug, config.action_delay_secs, runner),
            config,
            gpio,
            trigger_rx,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn gpio(&self) -> Option<&GpioWatch<B>> {
        self.gpio.as_ref()
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            debug!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Handles one trigger. Returns `false` when the loop should stop.
    pub fn handle(&mut self, trigger: Trigger) -> Result<bool, WatchError> {
        self.transition(WatchState::Triggered);

        let handler = self.gpio.as_ref().map(|g| g.handler());
        if let Err(e) = self.initiator.initiate(&trigger, handler) {
            self.transition(WatchState::Terminated);
            return Err(e);
        }
        self.transition(WatchState::ActionInitiated);

        if self.config.once {
            info!("Single action mode, stopping watcher.");
            self.transition(WatchState::Terminated);
            return Ok(false);
        }
        self.transition(WatchState::Polling);
        Ok(true)
    }

    /// Checks each semaphore once, shutdown first. Triggers are handled one
    /// at a time so that a stopping action leaves the rest on disk.
    pub fn poll_files(&mut self) -> Result<bool, WatchError> {
        for action in [Action::Shutdown, Action::Reboot] {
            if let Some(trigger) = self.files.check(action)
                && !self.handle(trigger)?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn run<F>(&mut self, shutdown: F) -> Result<Exit, WatchError>
    where
        F: Future<Output = Signal>,
    {
        tokio::pin!(shutdown);

        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.transition(WatchState::Polling);

        loop {
            tokio::select! {
                biased;

                sig = &mut shutdown => {
                    info!("Received signal {} ({}). Exiting gracefully.", sig.as_str(), sig as i32);
                    self.transition(WatchState::Terminated);
                    return Ok(Exit::Signal(sig));
                }
                Some(trigger) = self.trigger_rx.recv() => {
                    if !self.handle(trigger)? {
                        return Ok(Exit::Completed);
                    }
                }
                _ = ticker.tick() => {
                    if !self.poll_files()? {
                        return Ok(Exit::Completed);
                    }
                }
            }
        }
    }
}
