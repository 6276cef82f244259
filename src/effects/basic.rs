use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{prepare, CancelToken, Effect, EffectDuration, Pacer};
use crate::color::hex_to_hsv;
use crate::link::DeviceLink;
use crate::Result;

/// One pass through the primary and secondary colors
#[derive(Debug, Clone)]
pub struct BasicColors {
    pub colors: Vec<(&'static str, &'static str)>,
    pub hold: Duration,
}

impl Default for BasicColors {
    fn default() -> Self {
        Self {
            colors: vec![
                ("#FF0000", "Red"),
                ("#00FF00", "Green"),
                ("#0000FF", "Blue"),
                ("#FFFF00", "Yellow"),
                ("#FF00FF", "Magenta"),
                ("#00FFFF", "Cyan"),
                ("#FFFFFF", "White"),
            ],
            hold: Duration::from_millis(1_500),
        }
    }
}

#[async_trait]
impl Effect for BasicColors {
    fn name(&self) -> &'static str {
        "basic_colors"
    }

    fn description(&self) -> &'static str {
        "Cycle through basic colors once"
    }

    #[instrument(skip(self, link, cancel), fields(effect = "basic_colors"))]
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Running basic colors demo");
        let pacer = Pacer::new(cancel, duration);
        prepare(link).await?;

        for (hex, name) in &self.colors {
            if !pacer.active() {
                break;
            }
            debug!("Showing {}", name);
            link.set_color(hex_to_hsv(hex)?).await?;
            if !pacer.pause(self.hold).await {
                break;
            }
        }
        Ok(())
    }
}
