/*!
 # Scheduling functionality for the lamp

 An in-process list of future actions (power on with a color, power off,
 run an effect, enable sync mode) and a polling loop that fires them once
 their trigger time has passed.

 Trigger times are local wall-clock times with minute resolution and are
 accepted in three forms:

 * `HH:MM` - today, or tomorrow if that time has already passed
 * `MM-DD HH:MM` - this year
 * `YYYY-MM-DD HH:MM` - exact
*/

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::color::hex_to_rgb;
use crate::controller::LampController;
use crate::effects::{CancelToken, EffectDuration, SYNC_EFFECT};
use crate::{Error, Result};

/// Color used by `on` entries that do not name one
pub const DEFAULT_COLOR: &str = "#FFFFFF";
/// Run time of `effect` and `sync` entries that do not name one
pub const DEFAULT_DURATION_SECS: u64 = 30;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// What an entry does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ScheduledAction {
    /// Power on and show `color` at `brightness` percent
    On { color: String, brightness: u8 },
    Off,
    /// Run a registered effect for `duration` seconds
    Effect { effect: String, duration: u64 },
    /// Firmware sync mode for `duration` seconds
    Sync { duration: u64 },
}

impl std::fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledAction::On { color, brightness } => {
                write!(f, "Turn ON ({color} @ {brightness}%)")
            }
            ScheduledAction::Off => write!(f, "Turn OFF"),
            ScheduledAction::Effect { effect, duration } => {
                write!(f, "{} effect ({duration}s)", effect.to_uppercase())
            }
            ScheduledAction::Sync { duration } => write!(f, "SYNC mode ({duration}s)"),
        }
    }
}

/// Loosely typed schedule request, as sent by the web API and the shell
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    pub action: String,
    pub time: String,
    pub color: Option<String>,
    pub brightness: Option<u32>,
    pub effect: Option<String>,
    pub duration: Option<u64>,
}

impl ScheduleRequest {
    /// Builds the typed action, checking every kind-specific parameter
    fn to_action(&self, controller: &LampController) -> Result<ScheduledAction> {
        let duration = self.duration.unwrap_or(DEFAULT_DURATION_SECS);

        match self.action.trim().to_lowercase().as_str() {
            "on" => {
                let color = self.color.as_deref().unwrap_or(DEFAULT_COLOR);
                // Normalize so listings always show #RRGGBB
                let color = hex_to_rgb(color)?.to_string();
                let brightness = self.brightness.unwrap_or(100);
                if brightness > 100 {
                    return Err(Error::ValueOutOfRange(brightness, 0, 100));
                }
                Ok(ScheduledAction::On {
                    color,
                    brightness: brightness as u8,
                })
            }
            "off" => Ok(ScheduledAction::Off),
            "effect" => {
                let effect = self
                    .effect
                    .as_deref()
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| Error::InvalidAction("effect needs an effect name".into()))?;
                if !controller.registry().contains(effect) {
                    return Err(Error::UnknownEffect(effect.to_string()));
                }
                Ok(ScheduledAction::Effect {
                    effect: effect.to_string(),
                    duration,
                })
            }
            "sync" => Ok(ScheduledAction::Sync { duration }),
            other => Err(Error::InvalidAction(format!(
                "unknown action {other:?} (expected on, off, effect or sync)"
            ))),
        }
    }
}

/// Lifecycle of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Fired,
}

/// One scheduled action
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Sequence number, never reused
    pub index: u32,
    #[serde(serialize_with = "serialize_time")]
    pub time: NaiveDateTime,
    #[serde(flatten)]
    pub action: ScheduledAction,
    pub state: EntryState,
    /// Failure recorded when the entry fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_time<S: Serializer>(time: &NaiveDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format(TIME_FORMAT))
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {} - {}", self.index, self.time.format(TIME_FORMAT), self.action)?;
        if let Some(error) = &self.error {
            write!(f, " [failed: {error}]")?;
        }
        Ok(())
    }
}

/// Resolves a time spec against `now`
pub fn parse_time_spec(spec: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let invalid = || Error::InvalidTimeFormat(spec.to_string());
    let words: Vec<&str> = spec.split_whitespace().collect();

    match words.as_slice() {
        [time] => {
            let time = parse_clock(time).ok_or_else(invalid)?;
            let today = now.date().and_time(time);
            if today > now {
                Ok(today)
            } else {
                now.date()
                    .checked_add_days(Days::new(1))
                    .map(|tomorrow| tomorrow.and_time(time))
                    .ok_or_else(invalid)
            }
        }
        [date, time] if date.len() == 5 => {
            let time = parse_clock(time).ok_or_else(invalid)?;
            let date = NaiveDate::parse_from_str(&format!("{}-{date}", now.year()), "%Y-%m-%d")
                .map_err(|_| invalid())?;
            Ok(date.and_time(time))
        }
        [date, time] if date.len() == 10 => {
            let time = parse_clock(time).ok_or_else(invalid)?;
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
            Ok(date.and_time(time))
        }
        _ => Err(invalid()),
    }
}

/// Strict `HH:MM`
fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let (hours, minutes) = raw.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.chars().chain(minutes.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

#[derive(Default)]
struct Book {
    pending: Vec<Entry>,
    fired: VecDeque<Entry>,
    next_index: u32,
}

/// Owns the schedule entries and fires them
pub struct Scheduler {
    controller: Arc<LampController>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    history_limit: usize,
    book: Mutex<Book>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        controller: Arc<LampController>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        history_limit: usize,
    ) -> Self {
        Self {
            controller,
            clock,
            poll_interval,
            history_limit,
            book: Mutex::new(Book {
                next_index: 1,
                ..Book::default()
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Validates and stores a request; returns the new entry's index
    #[instrument(skip(self))]
    pub fn add(&self, request: &ScheduleRequest) -> Result<u32> {
        let action = request.to_action(&self.controller)?;
        self.schedule(action, &request.time)
    }

    /// Stores an already typed action
    pub fn schedule(&self, action: ScheduledAction, time_spec: &str) -> Result<u32> {
        if let ScheduledAction::Effect { effect, .. } = &action {
            if !self.controller.registry().contains(effect) {
                return Err(Error::UnknownEffect(effect.clone()));
            }
        }
        let time = parse_time_spec(time_spec, self.clock.now())?;

        let mut book = self.book.lock();
        let index = book.next_index;
        book.next_index += 1;

        info!("Scheduled #{}: {} at {}", index, action, time.format(TIME_FORMAT));
        book.pending.push(Entry {
            index,
            time,
            action,
            state: EntryState::Pending,
            error: None,
        });
        Ok(index)
    }

    /// Pending entries in insertion order
    pub fn list(&self) -> Vec<Entry> {
        self.book.lock().pending.clone()
    }

    /// Fired entries, oldest first
    pub fn history(&self) -> Vec<Entry> {
        self.book.lock().fired.iter().cloned().collect()
    }

    /// Cancels a pending entry
    #[instrument(skip(self))]
    pub fn remove(&self, index: u32) -> Result<Entry> {
        let mut book = self.book.lock();
        let position = book
            .pending
            .iter()
            .position(|entry| entry.index == index)
            .ok_or(Error::NotFound(index))?;
        let entry = book.pending.remove(position);
        info!("Removed #{}", index);
        Ok(entry)
    }

    /// Drops every pending entry; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut book = self.book.lock();
        let count = book.pending.len();
        book.pending.clear();
        info!("Cleared {} schedules", count);
        count
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fires every due entry; returns how many fired
    ///
    /// Entries fire ordered by trigger time, ties in insertion order. A
    /// failing entry is logged and recorded, never retried.
    pub async fn tick(&self) -> usize {
        self.fire_due(&CancelToken::new()).await
    }

    /// Fires entries due at the start of the call, one at a time, until
    /// none are left or `stop` is cancelled
    ///
    /// Each entry stays pending, and removable, until it is taken to fire.
    async fn fire_due(&self, stop: &CancelToken) -> usize {
        let now = self.clock.now();
        let mut count = 0;

        while !stop.is_cancelled() {
            let Some(mut entry) = self.take_due(now) else {
                break;
            };
            info!("Executing #{}: {}", entry.index, entry.action);
            entry.state = EntryState::Fired;

            if let Err(e) = self.fire(&entry.action).await {
                error!("Scheduled action #{} failed: {}", entry.index, e);
                entry.error = Some(e.to_string());
            }

            let mut book = self.book.lock();
            book.fired.push_back(entry);
            while book.fired.len() > self.history_limit {
                book.fired.pop_front();
            }
            count += 1;
        }
        count
    }

    /// Removes the earliest pending entry due at `now`
    fn take_due(&self, now: NaiveDateTime) -> Option<Entry> {
        let mut book = self.book.lock();
        let position = book
            .pending
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.time <= now)
            .min_by_key(|(_, entry)| (entry.time, entry.index))
            .map(|(position, _)| position)?;
        Some(book.pending.remove(position))
    }

    async fn fire(&self, action: &ScheduledAction) -> Result<()> {
        match action {
            ScheduledAction::On { color, brightness } => {
                self.controller.power_on().await?;
                self.controller.set_color_hex(color, *brightness).await
            }
            ScheduledAction::Off => self.controller.power_off().await,
            ScheduledAction::Effect { effect, duration } => {
                self.controller
                    .run_effect(effect, EffectDuration::seconds(*duration))
                    .await
            }
            ScheduledAction::Sync { duration } => {
                self.controller
                    .run_effect(SYNC_EFFECT, EffectDuration::seconds(*duration))
                    .await
            }
        }
    }

    /// Polls until `stop` is cancelled
    ///
    /// Effects fired by an entry run inside this loop, so later entries wait
    /// until they finish. Cancelling `stop` while an entry fires preempts
    /// the lamp so the loop exits promptly; due entries not yet taken stay
    /// pending.
    pub async fn run(&self, stop: CancelToken) {
        info!("Scheduler started (polling every {:?})", self.poll_interval);
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let firing = self.fire_due(&stop);
            tokio::pin!(firing);
            let fired = tokio::select! {
                fired = &mut firing => fired,
                _ = stop.cancelled() => {
                    debug!("Stop requested while firing, preempting the lamp");
                    let (fired, ()) = tokio::join!(firing, self.controller.stop_effect());
                    fired
                }
            };
            if fired > 0 {
                debug!("Fired {} entries", fired);
            }
        }
        info!("Scheduler stopped");
    }

    /// Spawns [`Scheduler::run`] on a background task
    ///
    /// Returns `None` if the scheduler is already running.
    pub fn start(self: &Arc<Self>) -> Option<SchedulerHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return None;
        }

        let stop = CancelToken::new();
        let scheduler = Arc::clone(self);
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let _running = RunningFlag(&scheduler.running);
            scheduler.run(token).await;
        });

        Some(SchedulerHandle { stop, task })
    }
}

/// Clears the running flag when the loop exits, even by panic
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Controls a scheduler started with [`Scheduler::start`]
pub struct SchedulerHandle {
    stop: CancelToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops polling and waits for the loop to exit
    ///
    /// An effect fired by the scheduler is preempted.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
}
