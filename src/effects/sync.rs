/*!
 Firmware music/sync mode.

 Rather than streaming colors, this effect switches the lamp to `music`
 mode, sends a minimal scene and raises the music toggle; from then on the
 firmware generates the colors.
*/

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{CancelToken, Effect, EffectDuration, SYNC_EFFECT};
use crate::color::{Hsv, SAT_MAX, VAL_MAX};
use crate::driver::WorkMode;
use crate::link::DeviceLink;
use crate::{Error, Result};

/// Builds the scene payload that starts music cycling
///
/// Layout: `[id=00][count][mode=01][flags=00]` followed by each color as
/// big-endian `u16` hue, saturation and value, hex encoded. The count is a
/// single byte, so at most 255 colors fit.
pub fn music_scene(colors: &[Hsv]) -> Result<String> {
    let count = u8::try_from(colors.len()).map_err(|_| {
        Error::ValueOutOfRange(u32::try_from(colors.len()).unwrap_or(u32::MAX), 0, 255)
    })?;
    let mut scene = Vec::with_capacity(4 + colors.len() * 6);
    scene.extend_from_slice(&[0x00, count, 0x01, 0x00]);
    for color in colors {
        scene.extend_from_slice(&color.h.to_be_bytes());
        scene.extend_from_slice(&color.s.to_be_bytes());
        scene.extend_from_slice(&color.v.to_be_bytes());
    }
    Ok(scene.iter().map(|byte| format!("{byte:02x}")).collect())
}

/// Hands color generation over to the lamp firmware
///
/// With a bounded duration the mode is switched back to `colour` once the
/// duration elapses; with [`EffectDuration::Forever`] it stays active until
/// toggled off.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSync;

impl StreamSync {
    pub(crate) async fn activate(link: &DeviceLink) -> Result<()> {
        link.set_mode(WorkMode::Music).await?;
        link.set_scene(music_scene(&[Hsv::clamped(0, SAT_MAX, VAL_MAX)])?)
            .await?;
        link.set_music_toggle(true).await?;
        info!("Stream sync mode activated");
        Ok(())
    }

    pub(crate) async fn deactivate(link: &DeviceLink) -> Result<()> {
        link.set_music_toggle(false).await?;
        link.set_mode(WorkMode::Colour).await?;
        info!("Stream sync mode deactivated");
        Ok(())
    }
}

#[async_trait]
impl Effect for StreamSync {
    fn name(&self) -> &'static str {
        SYNC_EFFECT
    }

    fn description(&self) -> &'static str {
        "Music/stream sync mode (driven by the lamp firmware)"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "sync"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        Self::activate(link).await?;

        match duration {
            EffectDuration::Forever => Ok(()),
            EffectDuration::For(hold) => {
                if cancel.sleep(hold).await {
                    Self::deactivate(link).await?;
                }
                Ok(())
            }
        }
    }
}
