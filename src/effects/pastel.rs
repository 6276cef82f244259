use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{prepare, random_in, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::{Hsv, HUE_MAX, VAL_MAX};
use crate::link::DeviceLink;
use crate::Result;

/// Soft, low saturation colors
#[derive(Debug, Clone)]
pub struct Pastel {
    pub interval: Duration,
}

impl Default for Pastel {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl Effect for Pastel {
    fn name(&self) -> &'static str {
        "pastel"
    }

    fn description(&self) -> &'static str {
        "Soft pastel colors"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "pastel"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running pastel effect");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        while pacer.active() {
            let color = Hsv::clamped(
                random_in(0..=HUE_MAX),
                random_in(200..=500),
                random_in(700..=VAL_MAX),
            );
            link.set_color(color).await?;
            if !pacer.pause(self.interval).await {
                break;
            }
        }
        Ok(())
    }
}
