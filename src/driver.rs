/*!
 # Lamp driver abstraction

 The lamp exposes its state as numbered data points (DPS). This module
 defines the data point ids used by the crate, the `LampDriver` trait that
 transports them, and `SimulatedLamp`, an in-memory driver used when no
 device is reachable and in tests.
*/

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::color::Hsv;
use crate::settings;
use crate::{Error, Result};

/// Boolean: lamp on/off
pub const DP_POWER: u8 = 20;
/// String: work mode (`colour`, `white`, `scene`, `music`)
pub const DP_MODE: u8 = 21;
/// String: HSV color as `hhhhssssvvvv`
pub const DP_COLOR: u8 = 24;
/// String: raw scene data (hex)
pub const DP_SCENE: u8 = 25;
/// Boolean: music/sync start flag
pub const DP_MUSIC_TOGGLE: u8 = 27;

/// Value of a single data point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpsValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for DpsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpsValue::Bool(b) => write!(f, "{b}"),
            DpsValue::Int(i) => write!(f, "{i}"),
            DpsValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for DpsValue {
    fn from(value: bool) -> Self {
        DpsValue::Bool(value)
    }
}

impl From<&str> for DpsValue {
    fn from(value: &str) -> Self {
        DpsValue::Text(value.to_string())
    }
}

impl From<String> for DpsValue {
    fn from(value: String) -> Self {
        DpsValue::Text(value)
    }
}

/// Snapshot of every data point the lamp reported
pub type Status = BTreeMap<u8, DpsValue>;

/// Work modes understood by data point 21
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    Colour,
    White,
    Scene,
    Music,
}

impl WorkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkMode::Colour => "colour",
            WorkMode::White => "white",
            WorkMode::Scene => "scene",
            WorkMode::Music => "music",
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "colour" => Ok(WorkMode::Colour),
            "white" => Ok(WorkMode::White),
            "scene" => Ok(WorkMode::Scene),
            "music" => Ok(WorkMode::Music),
            other => Err(Error::ProtocolError(format!("Unknown work mode {other:?}"))),
        }
    }
}

/// Transport to one physical lamp
///
/// Implementations only need to write and read raw data points; the typed
/// helpers are provided on top of them. Callers are expected to serialize
/// access (see [`crate::DeviceLink`]), hence `&mut self`.
#[async_trait]
pub trait LampDriver: Send {
    /// Writes a single data point
    async fn set_value(&mut self, dp: u8, value: DpsValue) -> Result<()>;

    /// Reads every data point from the device
    async fn status(&mut self) -> Result<Status>;

    /// Switches the lamp on or off
    async fn power(&mut self, on: bool) -> Result<()> {
        self.set_value(DP_POWER, on.into()).await
    }

    /// Switches the work mode
    async fn set_mode(&mut self, mode: WorkMode) -> Result<()> {
        self.set_value(DP_MODE, mode.as_str().into()).await
    }

    /// Sends an HSV color; the lamp only shows it in `colour` mode
    async fn set_color(&mut self, color: Hsv) -> Result<()> {
        self.set_value(DP_COLOR, color.to_dps().into()).await
    }

    /// Raises or clears the music/sync start flag
    async fn set_music_toggle(&mut self, on: bool) -> Result<()> {
        self.set_value(DP_MUSIC_TOGGLE, on.into()).await
    }

    /// Sends raw scene data
    async fn set_scene(&mut self, scene_hex: &str) -> Result<()> {
        self.set_value(DP_SCENE, scene_hex.into()).await
    }
}

/// In-memory lamp that keeps a data point table
#[derive(Debug, Clone)]
pub struct SimulatedLamp {
    dps: Status,
}

impl SimulatedLamp {
    /// A lamp that is off, in `colour` mode, showing red
    pub fn new() -> Self {
        let mut dps = Status::new();
        dps.insert(DP_POWER, DpsValue::Bool(false));
        dps.insert(DP_MODE, WorkMode::Colour.as_str().into());
        dps.insert(DP_COLOR, Hsv::clamped(0, 999, 999).to_dps().into());
        Self { dps }
    }
}

impl Default for SimulatedLamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens the driver for the configured lamp
///
/// Only the in-memory lamp ships with this crate, so a configured address is
/// logged and the lamp is simulated.
pub fn open(device: &settings::Device) -> Box<dyn LampDriver> {
    if device.address.is_empty() {
        info!("No lamp address configured, running in simulation mode");
    } else {
        warn!(
            "No network transport for lamp {} at {} (protocol {}), running in simulation mode",
            device.id, device.address, device.version
        );
    }
    Box::new(SimulatedLamp::new())
}

#[async_trait]
impl LampDriver for SimulatedLamp {
    #[instrument(skip(self))]
    async fn set_value(&mut self, dp: u8, value: DpsValue) -> Result<()> {
        trace!("Simulated write");
        self.dps.insert(dp, value);
        Ok(())
    }

    async fn status(&mut self) -> Result<Status> {
        debug!("Reading simulated status ({} data points)", self.dps.len());
        Ok(self.dps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_lamp_tracks_writes() {
        let mut lamp = SimulatedLamp::new();
        assert_eq!(lamp.status().await.unwrap()[&DP_POWER], DpsValue::Bool(false));

        lamp.power(true).await.unwrap();
        lamp.set_mode(WorkMode::Music).await.unwrap();
        lamp.set_color(Hsv::clamped(120, 999, 500)).await.unwrap();

        let status = lamp.status().await.unwrap();
        assert_eq!(status[&DP_POWER], DpsValue::Bool(true));
        assert_eq!(status[&DP_MODE], DpsValue::Text("music".into()));
        assert_eq!(status[&DP_COLOR], DpsValue::Text("007803e701f4".into()));
    }

    #[test]
    fn test_dps_value_serializes_untagged() {
        let mut status = Status::new();
        status.insert(DP_POWER, DpsValue::Bool(true));
        status.insert(DP_MODE, "colour".into());
        status.insert(26, DpsValue::Int(7));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"20": true, "21": "colour", "26": 7}));
    }

    #[test]
    fn test_work_mode_parse() {
        assert_eq!("music".parse::<WorkMode>().unwrap(), WorkMode::Music);
        assert!("disco".parse::<WorkMode>().is_err());
    }
}
