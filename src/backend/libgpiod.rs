use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use nix::libc::EBUSY;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::PinConfig;
use crate::error::WatchError;
use crate::gpio::{Edge, EdgeEvent, EventHandler, GpioBackend};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 16;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(100);

pub struct LibgpiodBackend {
    lines: RwLock<FxHashMap<u32, EdgeListener>>, // keyed by line offset
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(pin: &PinConfig, line_cfg: &line::Config) -> Result<Self, WatchError> {
        let chip = Self::open_chip(pin)?;
        let num_lines = chip
            .info()
            .map_err(|e| gpio_err(pin.line, "chip info", e))?
            .num_lines();
        if pin.line as usize >= num_lines {
            return Err(WatchError::GpioUnavailable(
                pin.line,
                format!("{} has only {num_lines} lines", pin.chip),
            ));
        }
        let request = Self::request_lines(pin.line, &chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(pin: &PinConfig) -> Result<Chip, WatchError> {
        let p = PathBuf::from(&pin.chip);
        Chip::open(&p).map_err(|e| gpio_err(pin.line, &format!("open chip {}", pin.chip), e))
    }

    fn request_lines(
        offset: u32,
        chip: &Chip,
        line_cfg: &line::Config,
    ) -> Result<request::Request, WatchError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| gpio_err(offset, "request config", e))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| gpio_err(offset, "request consumer", e))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| gpio_err(offset, "request lines", e))
    }
}

// The kernel answers EBUSY when another consumer holds the line.
fn gpio_err(offset: u32, what: &str, err: libgpiod::Error) -> WatchError {
    match err {
        libgpiod::Error::OperationFailed(_, errno) if errno.0 == EBUSY => {
            WatchError::GpioBusy(offset)
        }
        other => WatchError::GpioUnavailable(offset, format!("{what}: {other}")),
    }
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(offset: u32, gpiod_handle: GpiodHandle, handler: EventHandler) -> Result<Self, WatchError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| gpio_err(offset, "event buffer", e))?;

        let handle = std::thread::spawn(move || {
            let req = &gpiod_handle.request;

            while !cancel_flag.load(Ordering::Relaxed) {
                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("wait edge events error for GPIO{offset}: {e}");
                            yield_now();
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let events = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for GPIO{offset}: {e}");
                        yield_now();
                        continue;
                    }
                };
                for evt in events {
                    let evt = match evt {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    let edge = match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => Edge::Rising,
                        Ok(line::EdgeKind::Falling) => Edge::Falling,
                        Err(_) => continue,
                    };
                    debug!("GPIO{offset} {edge:?} edge");

                    handler.dispatch(EdgeEvent { line: offset, edge });
                }
            }
            // request is dropped here, releasing the line
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    pub fn new() -> Result<Self, WatchError> {
        Ok(Self {
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    /// Active-low button: pulled-up input, a press pulls the line down.
    fn make_line_settings(pin: &PinConfig, edges: bool) -> Result<line::Settings, WatchError> {
        let mut ls = line::Settings::new().map_err(|e| gpio_err(pin.line, "line settings", e))?;

        ls.set_direction(line::Direction::Input)
            .map_err(|e| gpio_err(pin.line, "set direction", e))?;
        ls.set_bias(Some(line::Bias::PullUp))
            .map_err(|e| gpio_err(pin.line, "set bias", e))?;

        if edges {
            ls.set_edge_detection(Some(line::Edge::Falling))
                .map_err(|e| gpio_err(pin.line, "set edge detection", e))?;
            ls.set_event_clock(EventClock::Realtime)
                .map_err(|e| gpio_err(pin.line, "set event clock", e))?;
            ls.set_debounce_period(Duration::from_millis(pin.debounce_ms));
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, WatchError> {
        let mut cfg = line::Config::new().map_err(|e| gpio_err(offset, "line config", e))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| gpio_err(offset, "line config add settings", e))?;
        Ok(cfg)
    }
}

impl GpioBackend for LibgpiodBackend {
    fn probe(&self, pin: &PinConfig) -> Result<(), WatchError> {
        if self.lines.read().contains_key(&pin.line) {
            return Err(WatchError::GpioBusy(pin.line));
        }

        let line_settings = Self::make_line_settings(pin, false)?;
        let line_cfg = Self::make_line_config(pin.line, line_settings)?;
        drop(GpiodHandle::new(pin, &line_cfg)?);
        Ok(())
    }

    fn watch(&self, pin: &PinConfig, handler: EventHandler) -> Result<(), WatchError> {
        let mut lines = self.lines.write();
        if lines.contains_key(&pin.line) {
            return Err(WatchError::GpioBusy(pin.line));
        }

        let line_settings = Self::make_line_settings(pin, true)?;
        let line_cfg = Self::make_line_config(pin.line, line_settings)?;
        let gpiod_handle = GpiodHandle::new(pin, &line_cfg)?;

        lines.insert(pin.line, EdgeListener::new(pin.line, gpiod_handle, handler)?);
        Ok(())
    }

    fn release(&self, line: u32) {
        // listener joins its thread on drop; take it out of the lock first
        let listener = self.lines.write().remove(&line);
        drop(listener);
    }
}
