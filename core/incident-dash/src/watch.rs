//! Live view: merges the incident stream into the list and reads line
//! commands from stdin.

use std::io::{BufRead, IsTerminal, Write};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use incident_core::{BulkAction, HttpIncidentApi, IncidentApi, IncidentEngine, RetryBackoff};
use incident_protocol::SortBy;

use crate::error::Result;
use crate::render;

const PUMP_WAIT: Duration = Duration::from_millis(250);

const HELP: &str = "\
commands:
  pause | resume            hold or replay live arrivals
  mute | unmute             hide Low severity arrivals
  scroll <px> | top         move the viewport (top acknowledges new rows)
  select <id> | select-all | clear
  resolve | investigate | delete   act on the selection
  open <id> | close         detail drawer
  sort <timestamp|severity> toggle sort
  dismiss                   clear error banners
  refresh | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum WatchCommand {
    Pause,
    Resume,
    Mute,
    Unmute,
    Scroll(f64),
    Top,
    Select(String),
    SelectAll,
    Clear,
    Bulk(BulkAction),
    Open(String),
    Close,
    Sort(SortBy),
    Refresh,
    Dismiss,
    Help,
    Quit,
}

impl FromStr for WatchCommand {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next();

        let verb = verb.to_ascii_lowercase();

        let command = match (verb.as_str(), arg) {
            ("pause", None) => WatchCommand::Pause,
            ("resume", None) => WatchCommand::Resume,
            ("mute", None) => WatchCommand::Mute,
            ("unmute", None) => WatchCommand::Unmute,
            ("scroll", Some(px)) => WatchCommand::Scroll(
                px.parse::<f64>()
                    .ok()
                    .filter(|px| px.is_finite() && *px >= 0.0)
                    .ok_or_else(|| format!("invalid scroll offset: {}", px))?,
            ),
            ("top", None) => WatchCommand::Top,
            ("select", Some(id)) => WatchCommand::Select(id.to_string()),
            ("select-all", None) => WatchCommand::SelectAll,
            ("clear", None) => WatchCommand::Clear,
            ("resolve" | "investigate" | "delete", None) => WatchCommand::Bulk(verb.parse()?),
            ("open", Some(id)) => WatchCommand::Open(id.to_string()),
            ("close", None) => WatchCommand::Close,
            ("sort", Some(field)) => {
                WatchCommand::Sort(field.parse().map_err(|err| format!("{}", err))?)
            }
            ("refresh", None) => WatchCommand::Refresh,
            ("dismiss", None) => WatchCommand::Dismiss,
            ("help" | "?", None) => WatchCommand::Help,
            ("quit" | "exit" | "q", None) => WatchCommand::Quit,
            _ => return Err(format!("unknown command: {} (try `help`)", line.trim())),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments: {}", line.trim()));
        }
        Ok(command)
    }
}

type CommandLine = std::result::Result<WatchCommand, String>;

/// One item drained from the command channel.
#[derive(Debug, PartialEq)]
enum Input {
    Command(WatchCommand),
    Invalid(String),
    /// Stdin reached end of input; nothing more will arrive.
    Closed,
}

/// Runs until `quit` or end of input. Stream and fetch failures are shown and
/// retried, never fatal.
pub fn run<A: IncidentApi>(engine: &mut IncidentEngine<A>) -> Result<()> {
    let commands = spawn_stdin_reader()?;
    let transport = HttpIncidentApi::stream_transport(&engine.config().stream_url());
    engine.connect_stream(Arc::new(transport));

    let mut stdout = std::io::stdout();
    let clear_screen = stdout.is_terminal();
    let mut notice: Option<String> = None;
    let mut dirty = true;
    let mut fetch_backoff = RetryBackoff::from_config(&engine.config().stream);
    let mut next_sync_at: Option<Instant> = None;

    loop {
        let activity = engine.pump_stream(PUMP_WAIT);
        dirty |= activity.opened || activity.disconnected || activity.received > 0;

        dirty |= engine.tick(Instant::now());

        if next_sync_at.map_or(true, |at| Instant::now() >= at) {
            match engine.sync() {
                Ok(fetched) => {
                    dirty |= fetched;
                    if fetched {
                        fetch_backoff.reset();
                    }
                    next_sync_at = None;
                }
                Err(err) => {
                    let at = fetch_backoff.ready_at(Instant::now());
                    tracing::debug!(error = %err, "Refetch failed; retrying after backoff");
                    next_sync_at = Some(at);
                    dirty = true;
                }
            }
        }

        for input in pending_input(&commands) {
            match input {
                Input::Command(WatchCommand::Quit) => {
                    engine.disconnect_stream();
                    return Ok(());
                }
                Input::Closed => {
                    tracing::info!("End of input; leaving watch");
                    engine.disconnect_stream();
                    return Ok(());
                }
                Input::Command(command) => {
                    next_sync_at = None;
                    notice = apply(engine, command);
                    dirty = true;
                }
                Input::Invalid(message) => {
                    notice = Some(message);
                    dirty = true;
                }
            }
        }

        if dirty {
            draw(&mut stdout, engine, clear_screen, notice.as_deref())?;
            dirty = false;
        }
    }
}

fn apply<A: IncidentApi>(engine: &mut IncidentEngine<A>, command: WatchCommand) -> Option<String> {
    match command {
        WatchCommand::Pause => {
            engine.set_paused(true);
            None
        }
        WatchCommand::Resume => {
            let replayed = engine.set_paused(false);
            (replayed > 0).then(|| format!("replayed {} queued incident(s)", replayed))
        }
        WatchCommand::Mute => {
            engine.set_mute_low(true);
            None
        }
        WatchCommand::Unmute => {
            engine.set_mute_low(false);
            None
        }
        WatchCommand::Scroll(px) => {
            engine.on_scroll(px);
            None
        }
        WatchCommand::Top => {
            if engine.toast_visible() {
                engine.click_toast();
            } else {
                engine.on_scroll(0.0);
            }
            None
        }
        WatchCommand::Select(id) => {
            engine.toggle_selected(&id);
            None
        }
        WatchCommand::SelectAll => {
            if engine.is_all_selected() {
                engine.clear_selection();
            } else {
                engine.select_all();
            }
            None
        }
        WatchCommand::Clear => {
            engine.clear_selection();
            None
        }
        WatchCommand::Bulk(action) => {
            if action == BulkAction::Resolve
                && engine.is_some_selected()
                && !engine.can_bulk_resolve()
            {
                return Some("every selected incident is already resolved".to_string());
            }
            match engine.bulk_action(action) {
                Ok(0) => Some("nothing selected".to_string()),
                Ok(count) => Some(format!("{} applied to {} incident(s)", action, count)),
                Err(err) => Some(err.to_string()),
            }
        }
        WatchCommand::Open(id) => match engine.open_incident(&id) {
            Ok(incident) => Some(render::detail(
                &incident,
                &engine.timeline(&id),
                engine.related(&id),
            )),
            Err(err) => Some(err.to_string()),
        },
        WatchCommand::Close => {
            engine.close_incident();
            None
        }
        WatchCommand::Sort(field) => {
            engine.toggle_sort(field);
            None
        }
        WatchCommand::Refresh => engine.refresh().err().map(|err| err.to_string()),
        WatchCommand::Dismiss => {
            for region in render::ERROR_REGIONS {
                engine.dismiss_error(region);
            }
            None
        }
        WatchCommand::Help => Some(HELP.to_string()),
        WatchCommand::Quit => None,
    }
}

fn draw<A: IncidentApi>(
    out: &mut impl Write,
    engine: &IncidentEngine<A>,
    clear_screen: bool,
    notice: Option<&str>,
) -> Result<()> {
    if clear_screen {
        write!(out, "\x1b[2J\x1b[H")?;
    }
    writeln!(out, "{}", render::table(engine))?;
    writeln!(out, "{}", render::status_line(engine))?;
    for line in render::errors(engine) {
        writeln!(out, "{}", line)?;
    }
    if let Some(notice) = notice {
        writeln!(out, "{}", notice)?;
    }
    out.flush()?;
    Ok(())
}

/// Drains the channel without blocking. A closed channel ends the batch with
/// [`Input::Closed`].
fn pending_input(commands: &Receiver<CommandLine>) -> Vec<Input> {
    let mut inputs = Vec::new();
    loop {
        match commands.try_recv() {
            Ok(Ok(command)) => inputs.push(Input::Command(command)),
            Ok(Err(message)) => inputs.push(Input::Invalid(message)),
            Err(TryRecvError::Empty) => return inputs,
            Err(TryRecvError::Disconnected) => {
                inputs.push(Input::Closed);
                return inputs;
            }
        }
    }
}

/// Parses stdin lines on a background thread. Blank lines are skipped; the
/// channel closes at end of input.
fn spawn_stdin_reader() -> Result<Receiver<CommandLine>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("incident-dash-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if sender.send(line.parse::<WatchCommand>()).is_err() {
                    break;
                }
            }
        })?;
    Ok(receiver)
}
