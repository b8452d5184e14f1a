// src/recorder/mod.rs
//! Trip recording state machine.
//!
//! [`TripRecorder`] owns the recording state, decides which fix source runs,
//! and is the only writer of the buffer's session and background flags. Source
//! callbacks never touch it directly; they enqueue [`RecorderMessage::Fix`]
//! and the owner of the inbox (normally [`RecorderService`]) feeds the
//! messages back in one at a time.

pub mod service;

pub use service::{RecorderHandle, RecorderService};

use crate::{
    error::{Result, TripError},
    finalize::TripFinalizer,
    gps::{FixPoint, PointNotice},
    permission::PermissionScope,
    source::{FixSource, StartOutcome, SubscriptionId},
    storage::FixBuffer,
    trips::{CompletedTrip, TripStore},
};
use log::{debug, info, warn};
use std::{fmt, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Off,
    ForegroundActive,
    BackgroundActive,
    Paused,
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::ForegroundActive | RecordingState::BackgroundActive)
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingState::Off => write!(f, "off"),
            RecordingState::ForegroundActive => write!(f, "recording (foreground)"),
            RecordingState::BackgroundActive => write!(f, "recording (background)"),
            RecordingState::Paused => write!(f, "paused"),
        }
    }
}

/// Published view of the recorder, derived from source ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingStatus {
    pub state: RecordingState,
    pub is_tracking: bool,
    pub is_background: bool,
    pub trip_exists: bool,
    pub fix_count: usize,
}

/// User actions, each answered on its own reply channel
#[derive(Debug)]
pub enum Command {
    Start(oneshot::Sender<Result<RecordingState>>),
    Pause(oneshot::Sender<Result<RecordingState>>),
    Resume(oneshot::Sender<Result<RecordingState>>),
    Stop(oneshot::Sender<Result<Option<CompletedTrip>>>),
    Discard(oneshot::Sender<Result<()>>),
    Status(oneshot::Sender<TrackingStatus>),
    Points(oneshot::Sender<Vec<FixPoint>>),
    Shutdown,
}

#[derive(Debug)]
pub enum RecorderMessage {
    Fix(FixPoint),
    Command(Command),
}

/// Everything the recorder needs, constructed once by the caller
pub struct RecorderParts {
    pub buffer: FixBuffer,
    pub foreground: Arc<dyn FixSource>,
    pub background: Arc<dyn FixSource>,
    pub store: Arc<dyn TripStore>,
}

pub struct TripRecorder {
    buffer: FixBuffer,
    foreground: Arc<dyn FixSource>,
    background: Arc<dyn FixSource>,
    store: Arc<dyn TripStore>,
    finalizer: TripFinalizer,
    state: RecordingState,
    last_fix: Option<FixPoint>,
    fix_count: usize,
    subscriptions: Vec<(Arc<dyn FixSource>, SubscriptionId)>,
    status_tx: watch::Sender<TrackingStatus>,
    notice_tx: broadcast::Sender<PointNotice>,
}

impl TripRecorder {
    /// Subscribe to both sources and restore whatever trip the buffer holds.
    ///
    /// A trip interrupted while background tracking was on resumes in the
    /// background immediately; any other buffered trip comes back paused.
    pub fn new(parts: RecorderParts, inbox: mpsc::UnboundedSender<RecorderMessage>) -> Self {
        let (status_tx, _) = watch::channel(TrackingStatus::default());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let mut recorder = Self {
            buffer: parts.buffer,
            foreground: parts.foreground,
            background: parts.background,
            store: parts.store,
            finalizer: TripFinalizer::new(),
            state: RecordingState::Off,
            last_fix: None,
            fix_count: 0,
            subscriptions: Vec::new(),
            status_tx,
            notice_tx,
        };

        for source in [recorder.foreground.clone(), recorder.background.clone()] {
            let tx = inbox.clone();
            let id = source.subscribe(Arc::new(move |fix: &FixPoint| {
                // Closed inbox means the recorder is gone
                let _ = tx.send(RecorderMessage::Fix(*fix));
            }));
            recorder.subscriptions.push((source, id));
        }

        recorder.restore();
        recorder
    }

    fn restore(&mut self) {
        let fixes = self.buffer.list();
        self.fix_count = fixes.len();
        self.last_fix = fixes.last().copied();

        if fixes.is_empty() {
            self.publish();
            return;
        }

        self.state = RecordingState::Paused;
        if self.buffer.is_active() && self.buffer.background_mode() {
            info!("Unfinished background trip with {} fixes, resuming", fixes.len());
            if let Err(e) = self.resume() {
                warn!("Could not resume background trip: {}", e);
            }
        } else {
            info!("Unfinished trip with {} fixes restored as paused", fixes.len());
            if let Err(e) = self.buffer.set_active(false) {
                warn!("Failed to clear session flag: {}", e);
            }
        }
        self.publish();
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn trip_exists(&self) -> bool {
        self.buffer.has_unfinished_trip()
    }

    pub fn points(&self) -> Vec<FixPoint> {
        self.buffer.list()
    }

    pub fn status(&self) -> TrackingStatus {
        *self.status_tx.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<TrackingStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<PointNotice> {
        self.notice_tx.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<PointNotice> {
        self.notice_tx.clone()
    }

    /// Begin a trip, preferring background tracking
    pub fn start(&mut self) -> Result<RecordingState> {
        match self.state {
            RecordingState::ForegroundActive | RecordingState::BackgroundActive
                if !self.source_lost() =>
            {
                return Ok(self.state)
            }
            RecordingState::ForegroundActive
            | RecordingState::BackgroundActive
            | RecordingState::Paused => return self.resume(),
            RecordingState::Off => {}
        }

        info!("Starting trip");
        self.activate(true)?;
        self.publish();
        Ok(self.state)
    }

    pub fn pause(&mut self) -> Result<RecordingState> {
        if !self.state.is_recording() {
            return Ok(self.state);
        }

        self.stop_sources();
        self.buffer.set_active(false)?;
        self.state = RecordingState::Paused;
        info!("Trip paused");
        self.publish();
        Ok(self.state)
    }

    /// Continue a paused trip in the mode it was last recorded in
    pub fn resume(&mut self) -> Result<RecordingState> {
        match self.state {
            RecordingState::ForegroundActive | RecordingState::BackgroundActive
                if !self.source_lost() =>
            {
                return Ok(self.state)
            }
            RecordingState::Off if !self.trip_exists() => return Err(TripError::NoTrip),
            _ => {}
        }

        let background = self.buffer.background_mode();
        info!("Resuming trip ({})", if background { "background" } else { "foreground" });
        self.activate(background)?;
        self.publish();
        Ok(self.state)
    }

    fn activate(&mut self, prefer_background: bool) -> Result<()> {
        self.buffer.set_active(true)?;

        if prefer_background {
            self.buffer.set_background_mode(true)?;
            let outcome = self.background.start();
            if outcome.is_started() {
                self.state = RecordingState::BackgroundActive;
                return Ok(());
            }
            warn!("Background tracking {}, falling back to foreground", outcome);
            self.buffer.set_background_mode(false)?;
        }

        let outcome = self.foreground.start();
        if outcome.is_started() {
            self.state = RecordingState::ForegroundActive;
            return Ok(());
        }

        self.buffer.set_active(false)?;
        warn!("Foreground tracking {}", outcome);
        Err(match outcome {
            StartOutcome::PermissionDenied(state) => TripError::PermissionDenied {
                scope: PermissionScope::Foreground,
                state,
            },
            other => TripError::SourceUnavailable(format!("foreground tracking {}", other)),
        })
    }

    fn stop_sources(&self) {
        self.foreground.stop();
        self.background.stop();
    }

    /// Stop both sources but keep every durable flag, so the next process
    /// restores the trip exactly as it was.
    pub fn release_sources(&self) {
        self.stop_sources();
    }

    /// End the trip and move it into the trip store.
    ///
    /// Returns `Ok(None)` when no fixes were recorded. On a store failure the
    /// buffer is left intact and the trip stays paused, so calling `stop`
    /// again retries. Once the trip is stored, a failure to clear the buffer
    /// is only logged and the recorder still ends up `Off`.
    pub fn stop(&mut self) -> Result<Option<CompletedTrip>> {
        self.stop_sources();
        for (flag, result) in [
            ("session", self.buffer.set_active(false)),
            ("background", self.buffer.set_background_mode(false)),
        ] {
            if let Err(e) = result {
                warn!("Failed to clear {} flag: {}", flag, e);
            }
        }

        let fixes = self.buffer.list();
        if fixes.is_empty() {
            debug!("Stop with no fixes, nothing to save");
            self.close_trip();
            return Ok(None);
        }

        match self.finalizer.finalize(&fixes, self.store.as_ref()) {
            Ok(trip) => {
                self.close_trip();
                Ok(Some(trip))
            }
            Err(e) => {
                warn!("Finalizing trip failed, keeping {} buffered fixes: {}", fixes.len(), e);
                self.state = RecordingState::Paused;
                self.publish();
                Err(e)
            }
        }
    }

    /// Drop the buffered trip without saving it
    pub fn discard(&mut self) -> Result<()> {
        self.stop_sources();
        info!("Discarding buffered trip");
        self.reset()
    }

    fn reset(&mut self) -> Result<()> {
        self.buffer.clear()?;
        self.mark_off();
        Ok(())
    }

    // Clear failures are only logged; the recorder ends up Off either way
    fn close_trip(&mut self) {
        if let Err(e) = self.buffer.clear() {
            warn!("Failed to clear trip buffer: {}", e);
        }
        self.mark_off();
    }

    fn mark_off(&mut self) {
        self.state = RecordingState::Off;
        self.last_fix = None;
        self.fix_count = 0;
        self.publish();
    }

    /// The source the current state records from is neither running nor
    /// starting, e.g. after the agent stopped on its own
    fn source_lost(&self) -> bool {
        let source = match self.state {
            RecordingState::ForegroundActive => &self.foreground,
            RecordingState::BackgroundActive => &self.background,
            RecordingState::Off | RecordingState::Paused => return false,
        };
        !source.is_active() && !source.is_pending()
    }

    /// Accept one fix from either source. Returns whether it was stored.
    pub fn handle_fix(&mut self, fix: FixPoint) -> bool {
        if !self.state.is_recording() {
            debug!("Fix while {} dropped", self.state);
            return false;
        }

        if let Some(last) = &self.last_fix {
            if *last == fix {
                debug!("Duplicate fix dropped");
                return false;
            }
            if fix.timestamp < last.timestamp {
                debug!("Out-of-order fix at {} dropped", fix.timestamp);
                return false;
            }
        }

        if !self.buffer.append(&fix) {
            return false;
        }

        self.last_fix = Some(fix);
        self.fix_count += 1;
        // No receivers is fine
        let _ = self.notice_tx.send(fix.notice());
        self.publish();
        true
    }

    /// Bring the recording state in line with what the sources report and
    /// republish the derived status.
    pub fn reconcile(&mut self) {
        let foreground = self.foreground.is_active();
        let background = self.background.is_active();
        self.fix_count = self.buffer.len();
        let trip_exists = self.fix_count > 0;

        let corrected = match self.state {
            RecordingState::Off | RecordingState::Paused if background => {
                Some(RecordingState::BackgroundActive)
            }
            RecordingState::Off | RecordingState::Paused if foreground => {
                Some(RecordingState::ForegroundActive)
            }
            RecordingState::Off if trip_exists => Some(RecordingState::Paused),
            RecordingState::ForegroundActive | RecordingState::BackgroundActive
                if self.source_lost() =>
            {
                Some(if trip_exists { RecordingState::Paused } else { RecordingState::Off })
            }
            _ => None,
        };

        if let Some(state) = corrected {
            info!("Reconciled recorder state {} -> {}", self.state, state);
            if let Err(e) = self.buffer.set_active(state.is_recording()) {
                warn!("Failed to update session flag: {}", e);
            }
            if !state.is_recording() {
                self.stop_sources();
            }
            self.state = state;
        }

        self.publish();
    }

    fn publish(&self) {
        let status = TrackingStatus {
            state: self.state,
            is_tracking: self.foreground.is_active() || self.background.is_active(),
            is_background: self.background.is_active(),
            trip_exists: self.fix_count > 0,
            fix_count: self.fix_count,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Apply one inbox message. Returns false once shutdown was requested.
    pub fn handle_message(&mut self, message: RecorderMessage) -> bool {
        let command = match message {
            RecorderMessage::Fix(fix) => {
                self.handle_fix(fix);
                return true;
            }
            RecorderMessage::Command(command) => command,
        };

        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::Discard(reply) => {
                let _ = reply.send(self.discard());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Points(reply) => {
                let _ = reply.send(self.points());
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Apply every message already queued. Returns how many were handled.
    pub fn drain(&mut self, inbox: &mut mpsc::UnboundedReceiver<RecorderMessage>) -> usize {
        let mut handled = 0;
        while let Ok(message) = inbox.try_recv() {
            handled += 1;
            if !self.handle_message(message) {
                break;
            }
        }
        handled
    }
}

impl Drop for TripRecorder {
    fn drop(&mut self) {
        for (source, id) in self.subscriptions.drain(..) {
            source.unsubscribe(id);
        }
    }
}
