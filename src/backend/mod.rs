//! GPIO line providers behind [`crate::gpio::GpioBackend`].

#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use self::libgpiod::LibgpiodBackend;
pub use self::mock::MockGpioBackend;
