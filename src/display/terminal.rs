// src/display/terminal.rs
//! Live terminal view of a recording session

use crate::{
    error::Result,
    gps::{FixPoint, PointNotice},
    recorder::{RecorderHandle, RecordingState, TrackingStatus},
    trips::CompletedTrip,
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use log::warn;
use std::{
    io::{self, Write},
    time::Duration,
};
use tokio::sync::broadcast::error::TryRecvError;

const REFRESH: Duration = Duration::from_millis(250);

/// How an interactive session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// `s` was pressed; `None` when there was nothing to save
    Saved(Option<CompletedTrip>),
    /// The user quit and the trip stays buffered
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Pause,
    Resume,
    Stop,
    Quit,
}

fn key_action(key: &KeyEvent) -> Option<KeyAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }
    match key.code {
        KeyCode::Char('p') => Some(KeyAction::Pause),
        KeyCode::Char('r') => Some(KeyAction::Resume),
        KeyCode::Char('s') => Some(KeyAction::Stop),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

pub struct TerminalDisplay {
    source: String,
}

impl TerminalDisplay {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }

    /// Run the display loop until the trip is saved or the user quits
    pub async fn run(&self, handle: &RecorderHandle) -> Result<SessionEnd> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(stdout, Hide, DisableLineWrap)?;

        let outcome = self.event_loop(&mut stdout, handle).await;

        execute!(stdout, Show, EnableLineWrap)?;
        terminal::disable_raw_mode()?;
        println!();
        outcome
    }

    async fn event_loop(
        &self,
        stdout: &mut impl Write,
        handle: &RecorderHandle,
    ) -> Result<SessionEnd> {
        let mut notices = handle.notices();
        let mut last_notice: Option<PointNotice> = None;
        let mut message: Option<String> = None;

        loop {
            loop {
                match notices.try_recv() {
                    Ok(notice) => last_notice = Some(notice),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Display skipped {} notices", skipped)
                    }
                    Err(_) => break,
                }
            }

            let status = handle.current_status();
            let lines = render_lines(&self.source, &status, last_notice, message.as_deref());
            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
            self.draw(stdout, &lines)?;
            stdout.flush()?;

            let action = match poll_event().await? {
                Some(Event::Key(key)) => key_action(&key),
                _ => None,
            };

            match action {
                Some(KeyAction::Pause) => {
                    message = Some(describe(handle.pause().await));
                }
                Some(KeyAction::Resume) => {
                    message = Some(describe(handle.resume().await));
                }
                Some(KeyAction::Stop) => match handle.stop().await {
                    Ok(trip) => return Ok(SessionEnd::Saved(trip)),
                    Err(e) => message = Some(format!("Save failed, press s to retry: {}", e)),
                },
                Some(KeyAction::Quit) => return Ok(SessionEnd::Left),
                None => {}
            }
        }
    }

    fn draw(&self, stdout: &mut impl Write, lines: &[Line]) -> Result<()> {
        for line in lines {
            match line.color {
                Some(color) => {
                    execute!(stdout, SetForegroundColor(color), Print(&line.text), ResetColor)?
                }
                None => execute!(stdout, Print(&line.text))?,
            }
            // Raw mode needs an explicit carriage return
            execute!(stdout, Print("\r\n"))?;
        }
        Ok(())
    }
}

/// Wait up to one refresh period for a terminal event off the async workers
async fn poll_event() -> Result<Option<Event>> {
    let polled = tokio::task::spawn_blocking(|| -> io::Result<Option<Event>> {
        if event::poll(REFRESH)? {
            event::read().map(Some)
        } else {
            Ok(None)
        }
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(polled?)
}

fn describe(result: Result<RecordingState>) -> String {
    match result {
        Ok(state) => format!("Now {}", state),
        Err(e) => format!("Error: {}", e),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    text: String,
    color: Option<Color>,
}

impl Line {
    fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), color: None }
    }

    fn colored(text: impl Into<String>, color: Color) -> Self {
        Self { text: text.into(), color: Some(color) }
    }
}

fn render_lines(
    source: &str,
    status: &TrackingStatus,
    last: Option<PointNotice>,
    message: Option<&str>,
) -> Vec<Line> {
    let state_color = match status.state {
        RecordingState::ForegroundActive | RecordingState::BackgroundActive => Color::Green,
        RecordingState::Paused => Color::Yellow,
        RecordingState::Off => Color::Red,
    };

    let mut lines = vec![
        Line::colored("=".repeat(60), Color::Green),
        Line::colored("Trip Recorder", Color::Green),
        Line::colored("=".repeat(60), Color::Green),
        Line::plain(format!("Source: {}", source)),
        Line::plain(""),
        Line::colored("RECORDING:", Color::Yellow),
        Line::colored(format!("  State:     {}", status.state), state_color),
        Line::plain(format!(
            "  Tracking:  {}{}",
            if status.is_tracking { "yes" } else { "no" },
            if status.is_background { " (background)" } else { "" }
        )),
        Line::plain(format!("  Fixes:     {}", status.fix_count)),
        Line::plain(""),
        Line::colored("LAST POSITION:", Color::Cyan),
    ];

    match last {
        Some(notice) => {
            let lat = FixPoint::format_coordinate(notice.lat);
            let lng = FixPoint::format_coordinate(notice.lng);
            lines.push(Line::plain(format!("  Latitude:  {}", lat)));
            lines.push(Line::plain(format!("  Longitude: {}", lng)));
        }
        None => lines.push(Line::plain("  Waiting for first fix")),
    }

    lines.push(Line::plain(""));
    if let Some(message) = message {
        lines.push(Line::colored(message, Color::Magenta));
    }
    lines.push(Line::colored("=".repeat(60), Color::Green));
    lines.push(Line::plain("p pause   r resume   s stop and save   q quit (keep trip)"));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_waiting() {
        let lines = render_lines("gpsd localhost:2947", &TrackingStatus::default(), None, None);
        let text: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert!(text.contains(&"  State:     off"));
        assert!(text.contains(&"  Waiting for first fix"));
    }

    #[test]
    fn test_render_recording() {
        let status = TrackingStatus {
            state: RecordingState::BackgroundActive,
            is_tracking: true,
            is_background: true,
            trip_exists: true,
            fix_count: 12,
        };
        let notice = PointNotice { lat: 42.438878, lng: -71.119277 };
        let lines = render_lines("serial", &status, Some(notice), Some("Now paused"));
        let text: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();

        assert!(text.contains(&"  Tracking:  yes (background)"));
        assert!(text.contains(&"  Fixes:     12"));
        assert!(text.contains(&"  Latitude:  42.43888"));
        assert!(text.contains(&"Now paused"));
    }

    #[test]
    fn test_key_actions() {
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(key_action(&key(KeyCode::Char('p'))), Some(KeyAction::Pause));
        assert_eq!(key_action(&key(KeyCode::Char('s'))), Some(KeyAction::Stop));
        assert_eq!(key_action(&key(KeyCode::Char('x'))), None);
        assert_eq!(
            key_action(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
    }
}
