/*!
 # Interactive shell

 A line-oriented front-end over [`LampController`] and [`Scheduler`]. Input
 and output are generic so the same loop serves stdin/stdout and tests.

 The top level controls the lamp directly; `schedule` enters a sub-mode that
 manages the scheduler until `back`.
*/

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, instrument};

use crate::color::{hsv_to_hex, Hsv, Rgb};
use crate::controller::LampController;
use crate::driver::DP_COLOR;
use crate::effects::EffectDuration;
use crate::schedule::{ScheduleRequest, Scheduler, SchedulerHandle, DEFAULT_DURATION_SECS};
use crate::{Error, Result};

const HELP: &str = "\
Commands:
  hex <#RRGGBB> [brightness]   Set color by hex, brightness 0-100
  rgb <r> <g> <b>              Set color by RGB (0-255)
  hsv <h> <s> <v>              Set color by HSV (0-359, 0-999, 0-999)
  on | off                     Turn lamp on or off
  sync [on|off]                Firmware music/stream sync mode
  status                       Show current data points
  effects                      List effects
  demo [name|number] [secs]    Run an effect in the background
  stop                         Stop the running effect
  schedule                     Enter scheduling mode
  help                         Show this help
  quit                         Exit";

const SCHEDULE_HELP: &str = "\
Schedule commands (time is HH:MM, MM-DD HH:MM or YYYY-MM-DD HH:MM):
  on <time> [#RRGGBB] [brightness]
  off <time>
  effect <time> <name> [secs]
  sync <time> [secs]
  list                         Pending entries
  history                      Fired entries
  remove <index>
  clear                        Remove all pending entries
  start | stop                 Start or stop the scheduler
  back                         Return to the main prompt";

/// A parsed top-level command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hex { color: String, brightness: u8 },
    Rgb(Rgb),
    Hsv { h: u16, s: u16, v: u16 },
    On,
    Off,
    Sync(bool),
    Status,
    Effects,
    /// Effect name or 1-based position in the effect list
    Demo { effect: Option<String>, seconds: u64 },
    Stop,
    Schedule,
    Help,
    Quit,
}

/// A parsed command of the scheduling sub-mode
#[derive(Debug, Clone)]
pub enum ScheduleCommand {
    Add(ScheduleRequest),
    List,
    History,
    Remove(u32),
    Clear,
    Start,
    Stop,
    Help,
    Back,
}

fn usage(text: &str) -> Error {
    Error::InvalidAction(format!("usage: {text}"))
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidAction(format!("{what} must be a number, got {raw:?}")))
}

/// A color channel; malformed values are color format errors
fn channel<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidFormat(format!("{what} {raw:?} is not a valid channel value")))
}

/// Parses one line of the top level; `None` for a blank line
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((head, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (head.to_lowercase().as_str(), args) {
        ("hex", [color]) => Command::Hex {
            color: color.to_string(),
            brightness: 100,
        },
        ("hex", [color, brightness]) => Command::Hex {
            color: color.to_string(),
            brightness: number(brightness, "brightness")?,
        },
        ("hex", _) => return Err(usage("hex <#RRGGBB> [brightness]")),
        ("rgb", [r, g, b]) => Command::Rgb(Rgb::new(
            channel(r, "red")?,
            channel(g, "green")?,
            channel(b, "blue")?,
        )),
        ("rgb", _) => return Err(usage("rgb <r> <g> <b>")),
        ("hsv", [h, s, v]) => Command::Hsv {
            h: channel(h, "hue")?,
            s: channel(s, "saturation")?,
            v: channel(v, "value")?,
        },
        ("hsv", _) => return Err(usage("hsv <h> <s> <v>")),
        ("on", []) => Command::On,
        ("off", []) => Command::Off,
        ("sync", []) => Command::Sync(true),
        ("sync", [state]) => match state.to_lowercase().as_str() {
            "on" => Command::Sync(true),
            "off" => Command::Sync(false),
            _ => return Err(usage("sync [on|off]")),
        },
        ("status", []) => Command::Status,
        ("effects", []) => Command::Effects,
        ("demo", []) => Command::Demo {
            effect: None,
            seconds: DEFAULT_DURATION_SECS,
        },
        ("demo", [effect]) => Command::Demo {
            effect: Some(effect.to_lowercase()),
            seconds: DEFAULT_DURATION_SECS,
        },
        ("demo", [effect, seconds]) => Command::Demo {
            effect: Some(effect.to_lowercase()),
            seconds: number(seconds, "seconds")?,
        },
        ("stop", []) => Command::Stop,
        ("schedule", []) => Command::Schedule,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => {
            return Err(Error::InvalidAction(format!(
                "unknown command or wrong arguments: {other} (try help)"
            )))
        }
    };
    Ok(Some(command))
}

/// Splits a leading time spec off `args`; a date word followed by a clock
/// word forms a single two-word spec
fn split_time<'a, 'b>(args: &'a [&'b str]) -> Option<(String, &'a [&'b str])> {
    match args {
        [date, clock, rest @ ..] if date.contains('-') && clock.contains(':') => {
            Some((format!("{date} {clock}"), rest))
        }
        [time, rest @ ..] => Some((time.to_string(), rest)),
        [] => None,
    }
}

/// Parses one line of the scheduling sub-mode; `None` for a blank line
pub fn parse_schedule_command(line: &str) -> Result<Option<ScheduleCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((head, args)) = words.split_first() else {
        return Ok(None);
    };
    let head = head.to_lowercase();

    let command = match head.as_str() {
        "on" | "off" | "effect" | "sync" => {
            let (time, rest) = split_time(args).ok_or_else(|| usage(add_usage(&head)))?;
            let mut request = ScheduleRequest {
                action: head.clone(),
                time,
                ..ScheduleRequest::default()
            };
            match (head.as_str(), rest) {
                ("on", []) | ("off", []) | ("sync", []) => {}
                ("on", [color]) => request.color = Some(color.to_string()),
                ("on", [color, brightness]) => {
                    request.color = Some(color.to_string());
                    request.brightness = Some(number(brightness, "brightness")?);
                }
                ("effect", [name]) => request.effect = Some(name.to_lowercase()),
                ("effect", [name, seconds]) => {
                    request.effect = Some(name.to_lowercase());
                    request.duration = Some(number(seconds, "seconds")?);
                }
                ("sync", [seconds]) => request.duration = Some(number(seconds, "seconds")?),
                _ => return Err(usage(add_usage(&head))),
            }
            ScheduleCommand::Add(request)
        }
        "list" => ScheduleCommand::List,
        "history" => ScheduleCommand::History,
        "remove" => match args {
            [index] => ScheduleCommand::Remove(number(index, "index")?),
            _ => return Err(usage("remove <index>")),
        },
        "clear" => ScheduleCommand::Clear,
        "start" => ScheduleCommand::Start,
        "stop" => ScheduleCommand::Stop,
        "help" | "?" => ScheduleCommand::Help,
        "back" | "exit" | "quit" => ScheduleCommand::Back,
        other => {
            return Err(Error::InvalidAction(format!(
                "unknown schedule command: {other} (try help)"
            )))
        }
    };
    Ok(Some(command))
}

fn add_usage(action: &str) -> &'static str {
    match action {
        "on" => "on <time> [#RRGGBB] [brightness]",
        "off" => "off <time>",
        "effect" => "effect <time> <name> [secs]",
        _ => "sync <time> [secs]",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Main,
    Schedule,
}

/// The interactive loop
pub struct Shell<R, W> {
    controller: Arc<LampController>,
    scheduler: Arc<Scheduler>,
    input: Lines<R>,
    output: W,
    mode: Mode,
    scheduler_handle: Option<SchedulerHandle>,
}

impl<R, W> Shell<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(controller: Arc<LampController>, scheduler: Arc<Scheduler>, input: R, output: W) -> Self {
        Self {
            controller,
            scheduler,
            input: input.lines(),
            output,
            mode: Mode::Main,
            scheduler_handle: None,
        }
    }

    /// Reads commands until `quit` or end of input
    ///
    /// Command failures are printed and the loop continues; only I/O errors
    /// end it early.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<()> {
        self.write_line("Lamp controller shell. Type help for commands.").await?;

        loop {
            let prompt = match self.mode {
                Mode::Main => "lamp> ",
                Mode::Schedule => "schedule> ",
            };
            self.output.write_all(prompt.as_bytes()).await?;
            self.output.flush().await?;

            let Some(line) = self.input.next_line().await? else {
                break;
            };
            debug!("Shell input: {:?}", line);

            let keep_going = match self.mode {
                Mode::Main => self.main_line(&line).await?,
                Mode::Schedule => self.schedule_line(&line).await?,
            };
            if !keep_going {
                break;
            }
        }

        if let Some(handle) = self.scheduler_handle.take() {
            handle.stop().await;
        }
        self.write_line("Bye").await
    }

    async fn main_line(&mut self, line: &str) -> Result<bool> {
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(true),
            Err(e) => {
                self.write_line(&format!("Error: {e}")).await?;
                return Ok(true);
            }
        };

        if command == Command::Quit {
            return Ok(false);
        }
        if let Err(e) = self.execute(command).await {
            self.write_line(&format!("Error: {e}")).await?;
        }
        Ok(true)
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Hex { color, brightness } => {
                self.controller.set_color_hex(&color, brightness).await?;
                self.write_line(&format!("Color set to {} @ {}%", color.to_uppercase(), brightness)).await
            }
            Command::Rgb(rgb) => {
                self.controller.set_color_rgb(rgb, 100).await?;
                self.write_line(&format!("Color set to {rgb}")).await
            }
            Command::Hsv { h, s, v } => {
                self.controller.set_color_hsv(h, s, v).await?;
                self.write_line(&format!("Color set to H:{h} S:{s} V:{v}")).await
            }
            Command::On => {
                self.controller.power_on().await?;
                self.write_line("Lamp on").await
            }
            Command::Off => {
                self.controller.power_off().await?;
                self.write_line("Lamp off").await
            }
            Command::Sync(on) => {
                self.controller.set_sync(on).await?;
                let state = if on { "on" } else { "off" };
                self.write_line(&format!("Sync mode {state}")).await
            }
            Command::Status => self.print_status().await,
            Command::Effects => self.print_effects().await,
            Command::Demo { effect: None, .. } => {
                self.print_effects().await?;
                self.write_line("Run one with: demo <name|number> [secs]").await
            }
            Command::Demo {
                effect: Some(effect),
                seconds,
            } => {
                let name = self.resolve_effect(&effect)?;
                self.controller
                    .spawn_effect(&name, EffectDuration::seconds(seconds))?;
                self.write_line(&format!("Running {name} for {seconds}s (stop to end early)")).await
            }
            Command::Stop => {
                self.controller.stop_effect().await;
                self.write_line("Effect stopped").await
            }
            Command::Schedule => {
                self.mode = Mode::Schedule;
                self.write_line(SCHEDULE_HELP).await
            }
            Command::Help => self.write_line(HELP).await,
            Command::Quit => Ok(()),
        }
    }

    /// Accepts an effect name or its 1-based position in the list
    fn resolve_effect(&self, effect: &str) -> Result<String> {
        let names = self.controller.effects();
        if let Ok(position) = effect.parse::<usize>() {
            return position
                .checked_sub(1)
                .and_then(|i| names.get(i))
                .map(|name| name.to_string())
                .ok_or_else(|| Error::UnknownEffect(effect.to_string()));
        }
        Ok(effect.to_string())
    }

    async fn print_status(&mut self) -> Result<()> {
        let status = self.controller.status().await?;
        let mut text = String::from("Status:");
        for (dp, value) in &status {
            text.push_str(&format!("\n  {dp}: {value}"));
            if *dp == DP_COLOR {
                if let Ok(color) = Hsv::from_dps(&value.to_string()) {
                    text.push_str(&format!(" ({})", hsv_to_hex(color)));
                }
            }
        }
        self.write_line(&text).await
    }

    async fn print_effects(&mut self) -> Result<()> {
        let mut text = String::from("Effects:");
        for (i, effect) in self.controller.registry().iter().enumerate() {
            text.push_str(&format!(
                "\n  {:>2}. {:<15} {}",
                i + 1,
                effect.name(),
                effect.description()
            ));
        }
        self.write_line(&text).await
    }

    async fn schedule_line(&mut self, line: &str) -> Result<bool> {
        let command = match parse_schedule_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(true),
            Err(e) => {
                self.write_line(&format!("Error: {e}")).await?;
                return Ok(true);
            }
        };

        let message = match command {
            ScheduleCommand::Add(request) => match self.scheduler.add(&request) {
                Ok(index) => format!("Scheduled #{index}"),
                Err(e) => format!("Error: {e}"),
            },
            ScheduleCommand::List => entries_text("Pending schedules:", &self.scheduler.list()),
            ScheduleCommand::History => entries_text("Fired schedules:", &self.scheduler.history()),
            ScheduleCommand::Remove(index) => match self.scheduler.remove(index) {
                Ok(entry) => format!("Removed: {entry}"),
                Err(e) => format!("Error: {e}"),
            },
            ScheduleCommand::Clear => format!("Cleared {} schedules", self.scheduler.clear()),
            ScheduleCommand::Start => match self.scheduler.start() {
                Some(handle) => {
                    self.scheduler_handle = Some(handle);
                    "Scheduler started".to_string()
                }
                None => "Scheduler already running".to_string(),
            },
            ScheduleCommand::Stop => match self.scheduler_handle.take() {
                Some(handle) => {
                    handle.stop().await;
                    "Scheduler stopped".to_string()
                }
                None => "Scheduler is not running".to_string(),
            },
            ScheduleCommand::Help => SCHEDULE_HELP.to_string(),
            ScheduleCommand::Back => {
                self.mode = Mode::Main;
                "Back to main prompt".to_string()
            }
        };
        self.write_line(&message).await?;
        Ok(true)
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }
}

fn entries_text(title: &str, entries: &[crate::schedule::Entry]) -> String {
    if entries.is_empty() {
        return format!("{title} none");
    }
    let mut text = title.to_string();
    for entry in entries {
        text.push_str(&format!("\n  {entry}"));
    }
    text
}
