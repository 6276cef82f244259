//! Rainbow effects: a smooth hue sweep and random vibrant colors.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{prepare, random_in, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::{Hsv, HUE_MAX, SAT_MAX, VAL_MAX};
use crate::link::DeviceLink;
use crate::Result;

/// Sweeps the hue wheel at full saturation and value, wrapping around
#[derive(Debug, Clone)]
pub struct Rainbow {
    /// Degrees added per step
    pub hue_step: u16,
    /// Delay between two steps
    pub step_delay: Duration,
}

impl Default for Rainbow {
    fn default() -> Self {
        Self {
            hue_step: 5,
            step_delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl Effect for Rainbow {
    fn name(&self) -> &'static str {
        "rainbow"
    }

    fn description(&self) -> &'static str {
        "Smooth rainbow cycle"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "rainbow"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running rainbow effect");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        let mut hue = 0u16;
        while pacer.active() {
            link.set_color(Hsv::clamped(hue, SAT_MAX, VAL_MAX)).await?;
            hue = (hue + self.hue_step) % (HUE_MAX + 1);
            if !pacer.pause(self.step_delay).await {
                break;
            }
        }
        Ok(())
    }
}

/// Random vibrant colors at a steady pace
#[derive(Debug, Clone)]
pub struct RandomRainbow {
    pub interval: Duration,
}

impl Default for RandomRainbow {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Effect for RandomRainbow {
    fn name(&self) -> &'static str {
        "random_rainbow"
    }

    fn description(&self) -> &'static str {
        "Random vibrant colors"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "random_rainbow"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running random rainbow effect");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        while pacer.active() {
            let color = Hsv::clamped(
                random_in(0..=HUE_MAX),
                random_in(800..=SAT_MAX),
                random_in(800..=VAL_MAX),
            );
            link.set_color(color).await?;
            if !pacer.pause(self.interval).await {
                break;
            }
        }
        Ok(())
    }
}
