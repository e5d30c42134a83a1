//! noderoll core: data model, configuration, detection rules, and the
//! clock and cancellation primitives every wait loop is built on.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod image;
pub mod types;

pub use cancel::{CancelHandle, CancelSignal, Cancelled, cancel_pair};
pub use clock::{Clock, ClockFuture, ManualClock, SystemClock};
pub use config::{Config, ConfigError, ConfigResult, Settings};
pub use image::ImageResolver;
pub use types::*;
