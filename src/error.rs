use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Permission denied: {0}")]
    Privilege(String),
    #[error("GPIO {0} is busy")]
    GpioBusy(u32),
    #[error("GPIO {0} unavailable: {1}")]
    GpioUnavailable(u32, String),
    #[error("Failed to initiate action: {0}")]
    Spawn(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Terminal error: {0}")]
    Terminal(String),
}

impl WatchError {
    /// Failures with a known cause, reported as-is rather than as unhandled.
    pub fn is_anticipated(&self) -> bool {
        matches!(
            self,
            WatchError::Privilege(_) | WatchError::Spawn(_) | WatchError::Config(_)
        )
    }

    pub fn exit_code(&self) -> u8 {
        1
    }
}
