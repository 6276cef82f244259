use std::ops::RangeInclusive;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{prepare, random_delay, random_in, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::{Hsv, HUE_MAX, SAT_MAX, VAL_MAX};
use crate::link::DeviceLink;
use crate::Result;

/// Fast random flashing at full saturation
#[derive(Debug, Clone)]
pub struct Party {
    /// Per-step delay in milliseconds, drawn at random each step
    pub delay_ms: RangeInclusive<u64>,
}

impl Default for Party {
    fn default() -> Self {
        Self { delay_ms: 50..=200 }
    }
}

#[async_trait]
impl Effect for Party {
    fn name(&self) -> &'static str {
        "party"
    }

    fn description(&self) -> &'static str {
        "Super fast random flashing"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "party"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running party effect");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        while pacer.active() {
            link.set_color(Hsv::clamped(random_in(0..=HUE_MAX), SAT_MAX, VAL_MAX))
                .await?;
            if !pacer.pause(random_delay(self.delay_ms.clone())).await {
                break;
            }
        }
        Ok(())
    }
}
