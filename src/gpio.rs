use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use tokio::sync::mpsc;

use crate::config::PinConfig;
use crate::error::WatchError;
use crate::trigger::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone)]
pub struct EdgeEvent {
    pub line: u32,
    pub edge: Edge,
}

/// Turns edges on a watched line into at most one pending press.
///
/// The button is active-low, so a press is a falling edge. After forwarding a
/// press the handler disarms itself; nothing more is forwarded until
/// [`rearm`](Self::rearm) is called.
pub struct EventCallbackHandler {
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    armed: AtomicBool,
}

impl EventCallbackHandler {
    pub fn new(trigger_tx: mpsc::UnboundedSender<Trigger>) -> Self {
        Self {
            trigger_tx,
            armed: AtomicBool::new(true),
        }
    }

    pub fn dispatch(&self, event: EdgeEvent) {
        if event.edge != Edge::Falling {
            return;
        }
        if self.armed.swap(false, Ordering::AcqRel) {
            let _ = self.trigger_tx.send(Trigger::GpioPress { line: event.line });
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

pub type EventHandler = Arc<EventCallbackHandler>;

pub trait GpioBackend: Send + Sync {
    /// Acquires and immediately releases the line.
    fn probe(&self, pin: &PinConfig) -> Result<(), WatchError>;
    /// Requests the line as a pulled-up input and delivers its edges to `handler`.
    fn watch(&self, pin: &PinConfig, handler: EventHandler) -> Result<(), WatchError>;
    fn release(&self, line: u32);
}

pub struct GpioMonitor<B: GpioBackend> {
    backend: Arc<B>,
}

impl<B: GpioBackend> GpioMonitor<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn start(
        &self,
        pin: &PinConfig,
        trigger_tx: mpsc::UnboundedSender<Trigger>,
    ) -> Result<GpioWatch<B>, WatchError> {
        self.backend.probe(pin)?;

        let handler = Arc::new(EventCallbackHandler::new(trigger_tx));
        self.backend.watch(pin, handler.clone())?;
        info!("Monitoring GPIO{} for shutdown signal.", pin.line);

        Ok(GpioWatch {
            backend: self.backend.clone(),
            line: pin.line,
            handler,
        })
    }

    /// Like [`start`](Self::start) but a failure only costs the button.
    pub fn start_or_skip(
        &self,
        pin: &PinConfig,
        trigger_tx: mpsc::UnboundedSender<Trigger>,
    ) -> Option<GpioWatch<B>> {
        match self.start(pin, trigger_tx) {
            Ok(watch) => Some(watch),
            Err(WatchError::GpioBusy(line)) => {
                warn!("GPIO {line} is busy. Skipping GPIO monitoring.");
                None
            }
            Err(e) => {
                warn!("Could not initialize GPIO {}: {e}", pin.line);
                None
            }
        }
    }
}

/// An active line request. Dropping it releases the line.
pub struct GpioWatch<B: GpioBackend> {
    backend: Arc<B>,
    line: u32,
    handler: EventHandler,
}

impl<B: GpioBackend> GpioWatch<B> {
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn handler(&self) -> &EventHandler {
        &self.handler
    }
}

impl<B: GpioBackend> Drop for GpioWatch<B> {
    fn drop(&mut self) {
        self.handler.disarm();
        self.backend.release(self.line);
        info!("Released GPIO{}.", self.line);
    }
}
