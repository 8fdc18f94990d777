use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::config::PinConfig;
use crate::error::WatchError;
use crate::gpio::{Edge, EdgeEvent, EventHandler, GpioBackend};

/// In-process stand-in for a gpiochip. Lines read high (released) until
/// [`press`](MockGpioBackend::press) pulls them low.
#[derive(Default)]
pub struct MockGpioBackend {
    lines: RwLock<HashMap<u32, MockLineState>>, // keyed by line offset
    foreign: RwLock<HashSet<u32>>,
}

struct MockLineState {
    handler: EventHandler,
    value: u8,
}

impl MockGpioBackend {
    /// Simulates another process holding the line.
    pub fn claim_externally(&self, line: u32) {
        if let Ok(mut foreign) = self.foreign.write() {
            foreign.insert(line);
        }
    }

    pub fn is_watching(&self, line: u32) -> bool {
        self.lines
            .read()
            .map(|lines| lines.contains_key(&line))
            .unwrap_or(false)
    }

    /// Presses and releases the button: a falling edge followed by a rising one.
    pub fn press(&self, line: u32) -> Result<(), WatchError> {
        self.set_level(line, 0)?;
        self.set_level(line, 1)
    }

    pub fn set_level(&self, line: u32, value: u8) -> Result<(), WatchError> {
        let mut lines = self
            .lines
            .write()
            .map_err(|e| WatchError::GpioUnavailable(line, format!("lock poisoned: {e}")))?;
        let state = lines.get_mut(&line).ok_or_else(|| {
            WatchError::GpioUnavailable(line, "line not requested".to_string())
        })?;

        let old = state.value;
        state.value = value;

        let edge = match (old, value) {
            (1, 0) => Some(Edge::Falling),
            (0, 1) => Some(Edge::Rising),
            _ => None,
        };
        if let Some(edge) = edge {
            state.handler.dispatch(EdgeEvent { line, edge });
        }
        Ok(())
    }

    fn check_free(&self, line: u32) -> Result<(), WatchError> {
        let foreign = self
            .foreign
            .read()
            .map_err(|e| WatchError::GpioUnavailable(line, format!("lock poisoned: {e}")))?;
        if foreign.contains(&line) || self.is_watching(line) {
            return Err(WatchError::GpioBusy(line));
        }
        Ok(())
    }
}

impl GpioBackend for MockGpioBackend {
    fn probe(&self, pin: &PinConfig) -> Result<(), WatchError> {
        self.check_free(pin.line)
    }

    fn watch(&self, pin: &PinConfig, handler: EventHandler) -> Result<(), WatchError> {
        self.check_free(pin.line)?;

        let mut lines = self
            .lines
            .write()
            .map_err(|e| WatchError::GpioUnavailable(pin.line, format!("lock poisoned: {e}")))?;
        lines.insert(pin.line, MockLineState { handler, value: 1 });
        Ok(())
    }

    fn release(&self, line: u32) {
        if let Ok(mut lines) = self.lines.write() {
            lines.remove(&line);
        }
    }
}
