use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, instrument};

use super::{prepare, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::{Hsv, SAT_MAX, VAL_MAX};
use crate::link::DeviceLink;
use crate::Result;

/// Sends two colors in turn at a fixed cadence
async fn alternate(
    link: &DeviceLink,
    colors: [Hsv; 2],
    step_delay: Duration,
    duration: EffectDuration,
    cancel: &CancelToken,
) -> Result<()> {
    let pacer = Pacer::new(cancel, duration);
    prepare(link).await?;

    for color in colors.iter().cycle() {
        if !pacer.active() {
            break;
        }
        link.set_color(*color).await?;
        if !pacer.pause(step_delay).await {
            break;
        }
    }
    Ok(())
}

/// Red/blue siren
#[derive(Debug, Clone)]
pub struct Police {
    pub step_delay: Duration,
}

impl Default for Police {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(300),
        }
    }
}

#[async_trait]
impl Effect for Police {
    fn name(&self) -> &'static str {
        "police"
    }

    fn description(&self) -> &'static str {
        "Police siren (red/blue alternating)"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "police"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running police effect");
        let red = Hsv::clamped(0, SAT_MAX, VAL_MAX);
        let blue = Hsv::clamped(240, SAT_MAX, VAL_MAX);
        alternate(link, [red, blue], self.step_delay, duration, cancel).await
    }
}

/// Full-on/black flashing
#[derive(Debug, Clone)]
pub struct Strobe {
    pub color: Hsv,
    pub step_delay: Duration,
}

impl Default for Strobe {
    fn default() -> Self {
        Self {
            color: Hsv::clamped(0, 0, VAL_MAX),
            step_delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl Effect for Strobe {
    fn name(&self) -> &'static str {
        "strobe"
    }

    fn description(&self) -> &'static str {
        "Strobe flashing"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "strobe"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running strobe effect");
        let black = Hsv { v: 0, ..self.color };
        alternate(link, [self.color, black], self.step_delay, duration, cancel).await
    }
}

/// Value ramps up and down along a triangular envelope at a fixed hue
#[derive(Debug, Clone)]
pub struct Breathing {
    pub hue: u16,
    pub saturation: u16,
    /// Lowest value of the envelope
    pub floor: u16,
    /// One full in-and-out breath
    pub period: Duration,
    pub step_delay: Duration,
}

impl Default for Breathing {
    fn default() -> Self {
        Self {
            hue: 0,
            saturation: SAT_MAX,
            floor: 100,
            period: Duration::from_millis(1_900),
            step_delay: Duration::from_millis(50),
        }
    }
}

impl Breathing {
    /// Value at `elapsed` into the cycle
    fn value_at(&self, elapsed: Duration) -> u16 {
        let period = self.period.as_millis().max(1) as f64;
        let phase = (elapsed.as_millis() as f64 % period) / period;
        let envelope = 1.0 - (2.0 * phase - 1.0).abs();
        let span = f64::from(VAL_MAX.saturating_sub(self.floor));
        self.floor + (span * envelope).round() as u16
    }
}

#[async_trait]
impl Effect for Breathing {
    fn name(&self) -> &'static str {
        "breathing"
    }

    fn description(&self) -> &'static str {
        "Slow breathing brightness"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "breathing"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running breathing effect");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        let start = Instant::now();
        while pacer.active() {
            let value = self.value_at(start.elapsed());
            link.set_color(Hsv::clamped(self.hue, self.saturation, value))
                .await?;
            if !pacer.pause(self.step_delay).await {
                break;
            }
        }
        Ok(())
    }
}
