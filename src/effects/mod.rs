/*!
 # Software effects

 Effects are routines that drive the lamp from this process: each step
 computes a color, sends it through the [`DeviceLink`] and sleeps. They run
 until their duration elapses or their [`CancelToken`] is cancelled, whichever
 comes first. Cancellation is checked once per step and wakes the step's
 sleep early, but never interrupts a transmission in flight.

 The only exception is `sync`, which hands color generation over to the
 lamp firmware (music mode).
*/

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::driver::WorkMode;
use crate::link::DeviceLink;
use crate::Result;

mod basic;
mod nature;
mod party;
mod pastel;
mod rainbow;
mod sync;
mod utility;

pub use basic::BasicColors;
pub use nature::{Fire, Ocean, Sunset};
pub use party::Party;
pub use pastel::Pastel;
pub use rainbow::{RandomRainbow, Rainbow};
pub use sync::{music_scene, StreamSync};
pub use utility::{Breathing, Police, Strobe};

/// Name under which the firmware sync effect is registered
pub const SYNC_EFFECT: &str = "sync";

/// How long an effect should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectDuration {
    /// Stop after this long
    For(Duration),
    /// Run until cancelled
    Forever,
}

impl EffectDuration {
    pub fn seconds(seconds: u64) -> Self {
        EffectDuration::For(Duration::from_secs(seconds))
    }

    /// `None` when unbounded, including durations past the clock's range
    fn deadline(self, start: Instant) -> Option<Instant> {
        match self {
            EffectDuration::For(duration) => start.checked_add(duration),
            EffectDuration::Forever => None,
        }
    }
}

/// Cooperative cancellation shared between an effect and whoever started it
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration`; returns `false` if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A named routine driving the lamp
#[async_trait]
pub trait Effect: Send + Sync {
    /// Unique registry key
    fn name(&self) -> &'static str;

    /// One line shown in listings
    fn description(&self) -> &'static str;

    /// Runs to completion or cancellation
    async fn run(
        &self,
        link: &DeviceLink,
        duration: EffectDuration,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Effects by name, in registration order
#[derive(Clone, Default)]
pub struct EffectRegistry {
    effects: Vec<Arc<dyn Effect>>,
}

impl EffectRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every effect shipped with the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(BasicColors::default())
            .register(Rainbow::default())
            .register(RandomRainbow::default())
            .register(Party::default())
            .register(Fire::default())
            .register(Ocean::default())
            .register(Sunset::default())
            .register(Police::default())
            .register(Strobe::default())
            .register(Breathing::default())
            .register(Pastel::default())
            .register(StreamSync);
        registry
    }

    /// Adds an effect, replacing any effect with the same name
    pub fn register(&mut self, effect: impl Effect + 'static) -> &mut Self {
        let effect: Arc<dyn Effect> = Arc::new(effect);
        match self.effects.iter_mut().find(|e| e.name() == effect.name()) {
            Some(existing) => {
                warn!("Replacing already registered effect {}", effect.name());
                *existing = effect;
            }
            None => self.effects.push(effect),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Effect>> {
        self.effects.iter().find(|e| e.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effects.iter().any(|e| e.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Effect>> {
        self.effects.iter()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Tracks the deadline and cancellation of one effect run
pub(crate) struct Pacer<'a> {
    cancel: &'a CancelToken,
    deadline: Option<Instant>,
}

impl<'a> Pacer<'a> {
    pub(crate) fn new(cancel: &'a CancelToken, duration: EffectDuration) -> Self {
        Self {
            cancel,
            deadline: duration.deadline(Instant::now()),
        }
    }

    /// Whether another step should run
    pub(crate) fn active(&self) -> bool {
        !self.cancel.is_cancelled() && self.deadline.map_or(true, |d| Instant::now() < d)
    }

    /// Waits between two steps, never past the deadline
    ///
    /// Returns `false` when the effect should stop.
    pub(crate) async fn pause(&self, delay: Duration) -> bool {
        let delay = match self.deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        };
        self.cancel.sleep(delay).await && self.active()
    }
}

/// Powers the lamp on and switches it to `colour` mode
pub(crate) async fn prepare(link: &DeviceLink) -> Result<()> {
    debug!("Preparing lamp for effect");
    link.power(true).await?;
    link.set_mode(WorkMode::Colour).await
}

pub(crate) fn random_in(range: RangeInclusive<u16>) -> u16 {
    rand::thread_rng().gen_range(range)
}

pub(crate) fn random_delay(range: RangeInclusive<u64>) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(range))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::{DpsValue, DP_COLOR, DP_MODE, DP_POWER};
    use crate::link::testing::RecordingLamp;
    use crate::Hsv;

    fn link(recorder: &RecordingLamp) -> DeviceLink {
        DeviceLink::new(
            Box::new(recorder.clone()),
            Duration::from_secs(5),
            Duration::ZERO,
        )
    }

    fn colors(recorder: &RecordingLamp) -> Vec<Hsv> {
        recorder
            .writes_to(DP_COLOR)
            .into_iter()
            .map(|value| match value {
                DpsValue::Text(raw) => Hsv::from_dps(&raw).unwrap(),
                other => panic!("unexpected color value {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_builtin_registry() {
        let registry = EffectRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "basic_colors",
                "rainbow",
                "random_rainbow",
                "party",
                "fire",
                "ocean",
                "sunset",
                "police",
                "strobe",
                "breathing",
                "pastel",
                "sync",
            ]
        );
        assert!(registry.contains("party"));
        assert!(registry.get("disco").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = EffectRegistry::new();
        registry
            .register(Rainbow::default())
            .register(Rainbow {
                hue_step: 10,
                ..Rainbow::default()
            });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_huge_duration_has_no_deadline() {
        let start = Instant::now();
        assert_eq!(EffectDuration::seconds(u64::MAX).deadline(start), None);
        assert_eq!(EffectDuration::For(Duration::MAX).deadline(start), None);
        assert_eq!(
            EffectDuration::seconds(5).deadline(start),
            Some(start + Duration::from_secs(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_runs_until_cancelled() {
        let recorder = RecordingLamp::default();
        let link = Arc::new(link(&recorder));
        let token = CancelToken::new();

        let handle = {
            let link = link.clone();
            let token = token.clone();
            tokio::spawn(async move {
                Police::default()
                    .run(&link, EffectDuration::seconds(u64::MAX), &token)
                    .await
            })
        };

        time::sleep(Duration::from_secs(2)).await;
        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(!recorder.writes_to(DP_COLOR).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_token_wakes_sleep() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(60)).await });

        time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        assert!(!handle.await.unwrap());
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rainbow_respects_duration() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);
        let start = Instant::now();

        Rainbow::default()
            .run(&link, EffectDuration::seconds(5), &CancelToken::new())
            .await
            .unwrap();
        let returned = Instant::now();

        let elapsed = returned - start;
        assert!(elapsed >= Duration::from_secs(5), "returned early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(5_100), "overran: {elapsed:?}");

        let colors = colors(&recorder);
        assert!(!colors.is_empty());
        assert_eq!(colors[0], Hsv::clamped(0, 999, 999));
        assert_eq!(colors[1], Hsv::clamped(5, 999, 999));

        let (last_write, _, _) = recorder.last_write().unwrap();
        assert!(last_write <= returned);

        assert_eq!(recorder.writes_to(DP_POWER), vec![DpsValue::Bool(true)]);
        assert_eq!(recorder.writes_to(DP_MODE), vec![DpsValue::from("colour")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rainbow_wraps_hue() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        // 72 steps of 5 degrees cover one full turn
        Rainbow::default()
            .run(&link, EffectDuration::For(Duration::from_millis(7_500)), &CancelToken::new())
            .await
            .unwrap();

        let colors = colors(&recorder);
        assert!(colors.len() > 72);
        assert_eq!(colors[71].h, 355);
        assert_eq!(colors[72].h, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_effect_stops_within_one_step() {
        let recorder = RecordingLamp::default();
        let link = Arc::new(link(&recorder));
        let token = CancelToken::new();

        let handle = {
            let link = link.clone();
            let token = token.clone();
            tokio::spawn(async move {
                Party::default()
                    .run(&link, EffectDuration::Forever, &token)
                    .await
            })
        };

        time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        let cancelled_at = Instant::now();
        handle.await.unwrap().unwrap();

        assert!(Instant::now() - cancelled_at <= Duration::from_millis(200));
        let sent = recorder.writes.lock().len();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.writes.lock().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_effect_sends_nothing_after_prepare() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);
        let token = CancelToken::new();
        token.cancel();

        Police::default()
            .run(&link, EffectDuration::seconds(10), &token)
            .await
            .unwrap();

        assert!(recorder.writes_to(DP_COLOR).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_themed_palettes_stay_in_band() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        Fire::default()
            .run(&link, EffectDuration::seconds(10), &CancelToken::new())
            .await
            .unwrap();
        let fire = colors(&recorder);
        assert!(fire.len() >= 30);
        assert!(fire.iter().all(|c| c.h <= 60 && c.s >= 800 && c.v >= 600));

        let recorder = RecordingLamp::default();
        let link = self::link(&recorder);
        Ocean::default()
            .run(&link, EffectDuration::seconds(10), &CancelToken::new())
            .await
            .unwrap();
        let ocean = colors(&recorder);
        assert!(!ocean.is_empty());
        assert!(ocean.iter().all(|c| (150..=240).contains(&c.h) && c.v <= 900));

        let recorder = RecordingLamp::default();
        let link = self::link(&recorder);
        Sunset::default()
            .run(&link, EffectDuration::seconds(10), &CancelToken::new())
            .await
            .unwrap();
        let sunset = colors(&recorder);
        assert!(sunset.iter().all(|c| {
            (270..=300).contains(&c.h) || (320..=340).contains(&c.h) || (10..=40).contains(&c.h)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_police_alternates_red_and_blue() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        Police::default()
            .run(&link, EffectDuration::seconds(2), &CancelToken::new())
            .await
            .unwrap();

        let hues: Vec<u16> = colors(&recorder).iter().map(|c| c.h).collect();
        assert!(hues.len() >= 6);
        for (i, hue) in hues.iter().enumerate() {
            assert_eq!(*hue, if i % 2 == 0 { 0 } else { 240 });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_strobe_alternates_full_and_black() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        Strobe::default()
            .run(&link, EffectDuration::seconds(1), &CancelToken::new())
            .await
            .unwrap();

        let values: Vec<u16> = colors(&recorder).iter().map(|c| c.v).collect();
        assert!(values.len() >= 8);
        assert!(values.chunks(2).all(|pair| pair[0] == 999 && pair.get(1).map_or(true, |v| *v == 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breathing_envelope() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        Breathing::default()
            .run(&link, EffectDuration::seconds(4), &CancelToken::new())
            .await
            .unwrap();

        let colors = colors(&recorder);
        let values: Vec<u16> = colors.iter().map(|c| c.v).collect();
        assert!(colors.iter().all(|c| c.h == 0 && c.s == 999));
        assert_eq!(values[0], 100);
        assert!(values.iter().all(|v| (100..=999).contains(v)));
        assert!(values.iter().any(|v| *v > 900));
        // rises, then falls again within one period
        let peak = values.iter().position(|v| *v > 900).unwrap();
        assert!(values[peak..].iter().any(|v| *v < 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_colors_single_pass() {
        let recorder = RecordingLamp::default();
        let link = link(&recorder);

        BasicColors::default()
            .run(&link, EffectDuration::Forever, &CancelToken::new())
            .await
            .unwrap();

        let colors = colors(&recorder);
        assert_eq!(colors.len(), 7);
        assert_eq!(colors[0], Hsv::clamped(0, 999, 999));
        assert_eq!(colors[6], Hsv::clamped(0, 0, 999));
    }
}
