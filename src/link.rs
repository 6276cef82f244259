//! Serialized, rate-limited access to the lamp driver.
//!
//! The device protocol is not safe for concurrent use, so every transmission
//! from the controller, the effects and the scheduler goes through the single
//! mutex held by [`DeviceLink`].

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tracing::{debug, instrument, trace, warn};

use crate::color::Hsv;
use crate::driver::{LampDriver, Status, WorkMode};
use crate::{Error, Result};

/// A single write to the lamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    Mode(WorkMode),
    Color(Hsv),
    MusicToggle(bool),
    Scene(String),
}

struct Inner {
    driver: Box<dyn LampDriver>,
    last_command: Option<Instant>,
}

/// The one mutual-exclusion point in front of the lamp driver
pub struct DeviceLink {
    inner: Mutex<Inner>,
    /// Upper bound for a single driver call
    timeout: Duration,
    /// Minimum delay between two commands
    min_delay: Duration,
}

impl DeviceLink {
    pub fn new(driver: Box<dyn LampDriver>, timeout: Duration, min_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                driver,
                last_command: None,
            }),
            timeout,
            min_delay,
        }
    }

    /// Sends a command, waiting for the lock and the rate limit first
    #[instrument(skip(self))]
    pub async fn transmit(&self, command: Command) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_command {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait_time);
                time::sleep(wait_time).await;
            }
        }

        let driver = inner.driver.as_mut();
        let result = time::timeout(self.timeout, async {
            match command {
                Command::Power(on) => driver.power(on).await,
                Command::Mode(mode) => driver.set_mode(mode).await,
                Command::Color(color) => driver.set_color(color).await,
                Command::MusicToggle(on) => driver.set_music_toggle(on).await,
                Command::Scene(ref scene) => driver.set_scene(scene).await,
            }
        })
        .await;

        inner.last_command = Some(Instant::now());

        match result {
            Ok(result) => result,
            Err(_) => {
                warn!("Command timed out after {:?}", self.timeout);
                Err(Error::DeviceTimeout(self.timeout))
            }
        }
    }

    /// Reads a fresh status snapshot
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<Status> {
        let mut inner = self.inner.lock().await;
        let driver = inner.driver.as_mut();

        match time::timeout(self.timeout, driver.status()).await {
            Ok(status) => {
                let status = status?;
                debug!("Status read: {} data points", status.len());
                Ok(status)
            }
            Err(_) => {
                warn!("Status read timed out after {:?}", self.timeout);
                Err(Error::DeviceTimeout(self.timeout))
            }
        }
    }

    pub async fn power(&self, on: bool) -> Result<()> {
        self.transmit(Command::Power(on)).await
    }

    pub async fn set_mode(&self, mode: WorkMode) -> Result<()> {
        self.transmit(Command::Mode(mode)).await
    }

    pub async fn set_color(&self, color: Hsv) -> Result<()> {
        self.transmit(Command::Color(color)).await
    }

    pub async fn set_music_toggle(&self, on: bool) -> Result<()> {
        self.transmit(Command::MusicToggle(on)).await
    }

    pub async fn set_scene(&self, scene_hex: String) -> Result<()> {
        self.transmit(Command::Scene(scene_hex)).await
    }
}
