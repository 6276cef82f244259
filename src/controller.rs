use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::color::{hex_to_hsv, rgb_to_hsv, Hsv, Rgb};
use crate::driver::{LampDriver, Status, WorkMode};
use crate::effects::{
    CancelToken, Effect, EffectDuration, EffectRegistry, StreamSync, SYNC_EFFECT,
};
use crate::link::DeviceLink;
use crate::settings;
use crate::{Error, Result};

/// Main struct for controlling the lamp
///
/// Every command that changes what the lamp shows preempts the running
/// effect: the effect's token is cancelled and the command waits until the
/// effect has returned before transmitting.
pub struct LampController {
    link: DeviceLink,
    effects: Arc<EffectRegistry>,
    /// Held for the whole run of an effect and while a manual command transmits
    effect_slot: Mutex<()>,
    /// Token of the newest effect
    active: SyncMutex<CancelToken>,
}

impl LampController {
    pub fn new(link: DeviceLink, effects: EffectRegistry) -> Self {
        Self {
            link,
            effects: Arc::new(effects),
            effect_slot: Mutex::new(()),
            active: SyncMutex::new(CancelToken::new()),
        }
    }

    /// Controller over `driver` with the link limits of `device`
    pub fn from_settings(driver: Box<dyn LampDriver>, device: &settings::Device) -> Self {
        let link = DeviceLink::new(driver, device.timeout(), device.command_delay());
        Self::new(link, EffectRegistry::builtin())
    }

    /// Names of all registered effects, in registration order
    pub fn effects(&self) -> Vec<&'static str> {
        self.effects.names()
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.effects
    }

    /// Cancels the running effect and waits for it to return
    async fn preempt(&self) -> MutexGuard<'_, ()> {
        self.active.lock().cancel();
        self.effect_slot.lock().await
    }

    /// Turns the lamp on in `colour` mode
    #[instrument(skip(self))]
    pub async fn power_on(&self) -> Result<()> {
        let _slot = self.preempt().await;
        self.link.power(true).await?;
        self.link.set_mode(WorkMode::Colour).await?;
        info!("Lamp turned on");
        Ok(())
    }

    /// Turns the lamp off
    #[instrument(skip(self))]
    pub async fn power_off(&self) -> Result<()> {
        let _slot = self.preempt().await;
        self.link.power(false).await?;
        info!("Lamp turned off");
        Ok(())
    }

    /// Sets a `#RRGGBB` color at a brightness percentage (0-100)
    #[instrument(skip(self))]
    pub async fn set_color_hex(&self, hex: &str, brightness: u8) -> Result<()> {
        let color = hex_to_hsv(hex)?;
        let brightness = checked_brightness(brightness)?;
        self.send_color(color.with_brightness(brightness)).await?;
        info!("Color set to {} @ {}%", hex, brightness);
        Ok(())
    }

    /// Sets an RGB color at a brightness percentage (0-100)
    #[instrument(skip(self))]
    pub async fn set_color_rgb(&self, rgb: Rgb, brightness: u8) -> Result<()> {
        let brightness = checked_brightness(brightness)?;
        self.send_color(rgb_to_hsv(rgb).with_brightness(brightness))
            .await?;
        info!("Color set to {} @ {}%", rgb, brightness);
        Ok(())
    }

    /// Sets a device-native HSV color; the value channel is the brightness
    #[instrument(skip(self))]
    pub async fn set_color_hsv(&self, h: u16, s: u16, v: u16) -> Result<()> {
        let color = Hsv::new(h, s, v)?;
        self.send_color(color).await?;
        info!("Color set to {}", color);
        Ok(())
    }

    async fn send_color(&self, color: Hsv) -> Result<()> {
        let _slot = self.preempt().await;
        debug!("Sending color {}", color);
        self.link.set_mode(WorkMode::Colour).await?;
        self.link.set_color(color).await
    }

    /// Reads the current data points straight from the lamp
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<Status> {
        self.link.status().await
    }

    /// Runs an effect in the calling task until it finishes or is preempted
    #[instrument(skip(self))]
    pub async fn run_effect(&self, name: &str, duration: EffectDuration) -> Result<()> {
        let effect = self
            .effects
            .get(name)
            .ok_or_else(|| Error::UnknownEffect(name.to_string()))?;
        let token = self.claim();
        self.run_claimed(effect, duration, token).await
    }

    /// Validates the effect name, then runs it on a background task
    ///
    /// The effect owns the active token before this returns, so a command
    /// issued right after it still preempts it.
    #[instrument(skip(self))]
    pub fn spawn_effect(self: &Arc<Self>, name: &str, duration: EffectDuration) -> Result<()> {
        let effect = self
            .effects
            .get(name)
            .ok_or_else(|| Error::UnknownEffect(name.to_string()))?;
        let token = self.claim();

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let name = effect.name();
            if let Err(e) = controller.run_claimed(effect, duration, token).await {
                error!("Background effect {} failed: {}", name, e);
            }
        });
        Ok(())
    }

    /// Cancels the active token and installs a fresh one
    fn claim(&self) -> CancelToken {
        let mut active = self.active.lock();
        active.cancel();
        *active = CancelToken::new();
        active.clone()
    }

    async fn run_claimed(
        &self,
        effect: Arc<dyn Effect>,
        duration: EffectDuration,
        token: CancelToken,
    ) -> Result<()> {
        let name = effect.name();
        let _slot = self.effect_slot.lock().await;

        if token.is_cancelled() {
            debug!("Effect {} was preempted before it started", name);
            return Ok(());
        }

        info!("Starting effect {} ({:?})", name, duration);
        let result = effect.run(&self.link, duration, &token).await;
        match &result {
            Ok(()) if token.is_cancelled() => info!("Effect {} cancelled", name),
            Ok(()) => info!("Effect {} finished", name),
            Err(e) => warn!("Effect {} failed: {}", name, e),
        }
        result
    }

    /// Cancels the running effect, if any, and waits for it to stop
    #[instrument(skip(self))]
    pub async fn stop_effect(&self) {
        let _slot = self.preempt().await;
        debug!("No effect running");
    }

    /// Turns the firmware music/sync mode on or off
    #[instrument(skip(self))]
    pub async fn set_sync(&self, on: bool) -> Result<()> {
        if on {
            self.run_effect(SYNC_EFFECT, EffectDuration::Forever).await
        } else {
            let _slot = self.preempt().await;
            StreamSync::deactivate(&self.link).await
        }
    }
}

fn checked_brightness(brightness: u8) -> Result<u8> {
    if brightness > 100 {
        return Err(Error::ValueOutOfRange(brightness.into(), 0, 100));
    }
    Ok(brightness)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{self, Instant};

    use super::*;
    use crate::driver::{DpsValue, DP_COLOR, DP_MODE, DP_MUSIC_TOGGLE, DP_POWER};
    use crate::link::testing::{HangingLamp, RecordingLamp};

    fn controller(recorder: &RecordingLamp) -> Arc<LampController> {
        let link = DeviceLink::new(
            Box::new(recorder.clone()),
            Duration::from_secs(5),
            Duration::ZERO,
        );
        Arc::new(LampController::new(link, EffectRegistry::builtin()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_color_hex_applies_brightness() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.set_color_hex("#FF0000", 50).await.unwrap();

        assert_eq!(recorder.writes_to(DP_COLOR), vec![DpsValue::from("000003e701f4")]);
        assert_eq!(recorder.writes_to(DP_MODE), vec![DpsValue::from("colour")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_never_reaches_device() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        assert!(matches!(
            lamp.set_color_hex("red", 100).await,
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            lamp.set_color_hex("#FF0000", 101).await,
            Err(Error::ValueOutOfRange(101, 0, 100))
        ));
        assert!(matches!(
            lamp.set_color_hsv(400, 0, 0).await,
            Err(Error::ValueOutOfRange(..))
        ));
        assert!(matches!(
            lamp.run_effect("disco", EffectDuration::seconds(1)).await,
            Err(Error::UnknownEffect(_))
        ));
        assert!(matches!(
            lamp.spawn_effect("disco", EffectDuration::seconds(1)),
            Err(Error::UnknownEffect(_))
        ));

        assert!(recorder.writes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_color_preempts_running_effect() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.spawn_effect("party", EffectDuration::seconds(60)).unwrap();
        time::sleep(Duration::from_secs(2)).await;
        assert!(recorder.writes_to(DP_COLOR).len() > 5);

        let issued = Instant::now();
        lamp.set_color_hex("#00FF00", 100).await.unwrap();
        assert!(Instant::now() - issued <= Duration::from_millis(200));

        time::sleep(Duration::from_secs(5)).await;
        let (_, dp, value) = recorder.last_write().unwrap();
        assert_eq!(dp, DP_COLOR);
        assert_eq!(value, DpsValue::from("007803e703e7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_effect_replaces_running_effect() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.spawn_effect("rainbow", EffectDuration::Forever).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        lamp.spawn_effect("police", EffectDuration::seconds(3)).unwrap();
        time::sleep(Duration::from_secs(10)).await;

        // after police finished nothing else is sent: the rainbow is gone
        let writes_after = recorder.writes.lock().len();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.writes.lock().len(), writes_after);

        let (_, _, last) = recorder.last_write().unwrap();
        assert!(last == DpsValue::from("000003e703e7") || last == DpsValue::from("00f003e703e7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_off_stops_effect() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.spawn_effect("strobe", EffectDuration::Forever).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        lamp.power_off().await.unwrap();

        let (_, dp, value) = recorder.last_write().unwrap();
        assert_eq!((dp, value), (DP_POWER, DpsValue::Bool(false)));

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.last_write().unwrap().1, DP_POWER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_never_cached() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.power_on().await.unwrap();
        assert_eq!(lamp.status().await.unwrap()[&DP_POWER], DpsValue::Bool(true));

        lamp.power_off().await.unwrap();
        assert_eq!(lamp.status().await.unwrap()[&DP_POWER], DpsValue::Bool(false));
        assert_eq!(lamp.status().await.unwrap()[&DP_POWER], DpsValue::Bool(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_toggle() {
        let recorder = RecordingLamp::default();
        let lamp = controller(&recorder);

        lamp.set_sync(true).await.unwrap();
        assert_eq!(lamp.status().await.unwrap()[&DP_MODE], DpsValue::from("music"));

        lamp.set_sync(false).await.unwrap();
        let status = lamp.status().await.unwrap();
        assert_eq!(status[&DP_MODE], DpsValue::from("colour"));
        assert_eq!(status[&DP_MUSIC_TOGGLE], DpsValue::Bool(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_device_reports_timeout() {
        let link = DeviceLink::new(Box::new(HangingLamp), Duration::from_secs(1), Duration::ZERO);
        let lamp = LampController::new(link, EffectRegistry::builtin());

        assert!(matches!(lamp.power_on().await, Err(Error::DeviceTimeout(_))));
        assert!(matches!(lamp.status().await, Err(Error::DeviceTimeout(_))));
    }
}
