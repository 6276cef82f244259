/*!
 # Lava Lamp Controller Library

 A Rust library for controlling Wi-Fi smart lamps that expose their state as
 numbered data points (power, mode, HSV color).

 ## Features

 * Power on/off control
 * HEX, RGB and device-native HSV color control
 * Brightness scaling
 * Software effects (rainbow, party, fire, ocean, police, breathing, ...)
 * Firmware music/sync mode
 * Scheduling of power, color, effect and sync actions
 * HTTP/JSON API and an interactive shell

 ## Example

 ```rust,no_run
 use std::sync::Arc;
 use std::time::Duration;

 use lava_lamp::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let link = DeviceLink::new(
         Box::new(SimulatedLamp::new()),
         Duration::from_secs(5),
         Duration::from_millis(50),
     );
     let lamp = Arc::new(LampController::new(link, EffectRegistry::builtin()));

     // Basic operations
     lamp.power_on().await?;
     lamp.set_color_hex("#FF0000", 80).await?; // Red at 80%
     lamp.run_effect("rainbow", EffectDuration::seconds(10)).await?;

     Ok(())
 }
 ```
*/

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Custom error types for the lamp controller library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed color string
    #[error("Invalid color format: {0}")]
    InvalidFormat(String),

    /// Malformed schedule time
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// Unknown schedule action or missing action parameters
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// No effect registered under this name
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// No pending schedule entry with this index
    #[error("Schedule entry {0} not found")]
    NotFound(u32),

    /// Value out of range
    #[error("Value {0} out of range ({1}..{2})")]
    ValueOutOfRange(u32, u32, u32),

    /// The lamp could not be reached
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The lamp did not answer in time
    #[error("Device timed out after {0:?}")]
    DeviceTimeout(Duration),

    /// The lamp answered with something we could not decode
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Settings could not be loaded
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// I/O error from the shell or the HTTP listener
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status used by the web API for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidFormat(_)
            | Error::InvalidTimeFormat(_)
            | Error::InvalidAction(_)
            | Error::UnknownEffect(_)
            | Error::ValueOutOfRange(..) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DeviceUnreachable(_) | Error::ProtocolError(_) => StatusCode::BAD_GATEWAY,
            Error::DeviceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error was caused by the transport rather than the input
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnreachable(_) | Error::DeviceTimeout(_) | Error::ProtocolError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod color;
pub mod controller;
pub mod driver;
pub mod effects;
pub mod link;
pub mod schedule;
pub mod settings;
pub mod shell;
pub mod web;

// Re-export key types
pub use color::{Hsv, Rgb};
pub use controller::LampController;
pub use driver::{DpsValue, LampDriver, SimulatedLamp, Status, WorkMode};
pub use effects::{CancelToken, Effect, EffectDuration, EffectRegistry};
pub use link::DeviceLink;
pub use schedule::{
    Clock, Entry, EntryState, ScheduleRequest, ScheduledAction, Scheduler, SchedulerHandle,
    SystemClock,
};
pub use settings::Settings;
