mod action;
mod backend;
mod config;
mod error;
mod gpio;
mod logging;
mod terminal;
mod trigger;
mod watcher;

pub use action::{ActionInitiator, CommandRunner, DetachedShell};
pub use config::{Cli, FileConfig, PinConfig, WatcherConfig};
pub use error::WatchError;
pub use gpio::{
    Edge, EdgeEvent, EventCallbackHandler, EventHandler, GpioBackend, GpioMonitor, GpioWatch,
};
pub use logging::{SplitLogger, Stream, stream_for};
pub use terminal::TerminalGuard;
pub use trigger::{Action, FileTriggerMonitor, Trigger};
pub use watcher::{Exit, WatchState, Watcher, ensure_privileged, termination_signal};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
