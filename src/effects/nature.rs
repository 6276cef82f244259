/*!
 Themed effects that pick random colors from a fixed palette: fire flickers
 through reds and yellows, the ocean drifts through blues and greens, and the
 sunset mixes purples, pinks and oranges.
*/

use std::ops::RangeInclusive;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{info, instrument};

use super::{prepare, random_delay, random_in, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::Hsv;
use crate::link::DeviceLink;
use crate::Result;

/// Ranges a themed effect draws its colors and timing from
#[derive(Debug, Clone)]
pub struct Palette {
    /// One band is chosen per step, then a hue inside it
    pub hue_bands: Vec<RangeInclusive<u16>>,
    pub saturation: RangeInclusive<u16>,
    pub value: RangeInclusive<u16>,
    pub delay_ms: RangeInclusive<u64>,
}

impl Palette {
    fn pick(&self) -> Hsv {
        let band = self
            .hue_bands
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or(0..=0);
        Hsv::clamped(
            random_in(band),
            random_in(self.saturation.clone()),
            random_in(self.value.clone()),
        )
    }

    async fn play(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        while pacer.active() {
            link.set_color(self.pick()).await?;
            if !pacer.pause(random_delay(self.delay_ms.clone())).await {
                break;
            }
        }
        Ok(())
    }
}

macro_rules! themed_effect {
    ($ty:ident, $name:literal, $description:literal, $palette:expr) => {
        #[doc = $description]
        #[derive(Debug, Clone)]
        pub struct $ty {
            pub palette: Palette,
        }

        impl Default for $ty {
            fn default() -> Self {
                Self { palette: $palette }
            }
        }

        #[async_trait]
        impl Effect for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn description(&self) -> &'static str {
                $description
            }

            #[instrument(skip(self, link, cancel), fields(effect = $name))]
            async fn run(
                &self,
                link: &DeviceLink,
                duration: EffectDuration,
                cancel: &CancelToken,
            ) -> Result<()> {
                info!("Running {} effect", $name);
                self.palette.play(link, duration, cancel).await
            }
        }
    };
}

themed_effect!(
    Fire,
    "fire",
    "Flickering reds, oranges and yellows",
    Palette {
        hue_bands: vec![0..=60],
        saturation: 800..=999,
        value: 600..=999,
        delay_ms: 100..=300,
    }
);

themed_effect!(
    Ocean,
    "ocean",
    "Slowly drifting blues and greens",
    Palette {
        hue_bands: vec![150..=240],
        saturation: 600..=999,
        value: 500..=900,
        delay_ms: 500..=2_000,
    }
);

themed_effect!(
    Sunset,
    "sunset",
    "Purples, pinks and oranges",
    Palette {
        hue_bands: vec![270..=300, 320..=340, 10..=40],
        saturation: 700..=999,
        value: 600..=900,
        delay_ms: 1_000..=3_000,
    }
);
