// src/recorder/service.rs
//! Single-writer service loop around [`TripRecorder`]

use super::{Command, RecorderMessage, RecorderParts, RecordingState, TrackingStatus, TripRecorder};
use crate::{
    error::{Result, TripError},
    gps::{FixPoint, PointNotice},
    trips::CompletedTrip,
};
use log::{debug, info};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

/// Owns the recorder and applies fixes, commands and reconciliation ticks in
/// arrival order.
pub struct RecorderService {
    recorder: TripRecorder,
    inbox: mpsc::UnboundedReceiver<RecorderMessage>,
    reconcile_interval: Duration,
}

impl RecorderService {
    pub fn new(parts: RecorderParts, reconcile_interval: Duration) -> (Self, RecorderHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let recorder = TripRecorder::new(parts, tx.clone());
        let handle = RecorderHandle {
            inbox: tx,
            status: recorder.status_receiver(),
            notices: recorder.notice_sender(),
        };
        let service = Self {
            recorder,
            inbox,
            reconcile_interval,
        };
        (service, handle)
    }

    /// Construct the service and run it on the current runtime
    pub fn spawn(
        parts: RecorderParts,
        reconcile_interval: Duration,
    ) -> (RecorderHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(parts, reconcile_interval);
        (handle, tokio::spawn(service.run()))
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.reconcile_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Recorder service running, state {}", self.recorder.state());

        loop {
            tokio::select! {
                message = self.inbox.recv() => {
                    match message {
                        Some(message) => {
                            if !self.recorder.handle_message(message) {
                                info!("Recorder service shutting down");
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = interval.tick() => {
                    self.recorder.reconcile();
                }
            }
        }

        self.recorder.release_sources();
        debug!("Recorder service stopped");
    }
}

/// Cloneable front end to a running [`RecorderService`]
#[derive(Clone)]
pub struct RecorderHandle {
    inbox: mpsc::UnboundedSender<RecorderMessage>,
    status: watch::Receiver<TrackingStatus>,
    notices: broadcast::Sender<PointNotice>,
}

impl RecorderHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(RecorderMessage::Command(command(tx)))
            .map_err(|_| TripError::Other("Recorder service is not running".to_string()))?;
        rx.await
            .map_err(|_| TripError::Other("Recorder service dropped the request".to_string()))
    }

    pub async fn start(&self) -> Result<RecordingState> {
        self.request(Command::Start).await?
    }

    pub async fn pause(&self) -> Result<RecordingState> {
        self.request(Command::Pause).await?
    }

    pub async fn resume(&self) -> Result<RecordingState> {
        self.request(Command::Resume).await?
    }

    pub async fn stop(&self) -> Result<Option<CompletedTrip>> {
        self.request(Command::Stop).await?
    }

    pub async fn discard(&self) -> Result<()> {
        self.request(Command::Discard).await?
    }

    /// Status as of the last processed message
    pub async fn status(&self) -> Result<TrackingStatus> {
        self.request(Command::Status).await
    }

    pub async fn points(&self) -> Result<Vec<FixPoint>> {
        self.request(Command::Points).await
    }

    /// Feed a fix into the inbox as if a source had delivered it
    pub fn submit(&self, fix: FixPoint) -> Result<()> {
        self.inbox
            .send(RecorderMessage::Fix(fix))
            .map_err(|_| TripError::Other("Recorder service is not running".to_string()))
    }

    /// Stop the loop, leaving the buffered trip for the next run
    pub fn shutdown(&self) {
        let _ = self.inbox.send(RecorderMessage::Command(Command::Shutdown));
    }

    pub fn status_receiver(&self) -> watch::Receiver<TrackingStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> TrackingStatus {
        *self.status.borrow()
    }

    pub fn notices(&self) -> broadcast::Receiver<PointNotice> {
        self.notices.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{ConfiguredPermissions, PermissionProvider};
    use crate::source::{BackgroundFixSource, ForegroundFixSource, ManualAgent, ManualWatcher};
    use crate::storage::FixBuffer;
    use crate::trips::SqliteTripStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    fn parts(dir: &std::path::Path, watcher: Arc<ManualWatcher>) -> RecorderParts {
        let permissions: Arc<dyn PermissionProvider> =
            Arc::new(ConfiguredPermissions::all_granted());
        RecorderParts {
            buffer: FixBuffer::open(dir).unwrap(),
            foreground: Arc::new(ForegroundFixSource::new(watcher, permissions.clone())),
            background: Arc::new(BackgroundFixSource::new(
                Arc::new(ManualAgent::unavailable()),
                permissions,
            )),
            store: Arc::new(SqliteTripStore::in_memory().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_fixes_flow_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Arc::new(ManualWatcher::new());
        let (handle, task) =
            RecorderService::spawn(parts(dir.path(), watcher.clone()), Duration::from_millis(50));
        let mut notices = handle.notices();

        assert_eq!(handle.start().await.unwrap(), RecordingState::ForegroundActive);

        let t0 = Utc::now();
        watcher.push(FixPoint::new(0.0, 0.0, t0));
        watcher.push(FixPoint::new(0.0, 0.001, t0 + ChronoDuration::seconds(10)));

        assert_eq!(notices.recv().await.unwrap().lng, 0.0);
        assert_eq!(notices.recv().await.unwrap().lng, 0.001);
        assert_eq!(handle.points().await.unwrap().len(), 2);

        let trip = handle.stop().await.unwrap().unwrap();
        assert_eq!(trip.duration_seconds, 10);

        handle.shutdown();
        task.await.unwrap();
        assert!(handle.start().await.is_err());
    }

    #[tokio::test]
    async fn test_status_published_by_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Arc::new(ManualWatcher::new());
        let (handle, task) =
            RecorderService::spawn(parts(dir.path(), watcher), Duration::from_millis(20));
        let mut status = handle.status_receiver();

        handle.start().await.unwrap();
        handle.submit(FixPoint::new(1.0, 1.0, Utc::now())).unwrap();

        let recorded = status.wait_for(|s| s.fix_count == 1 && s.is_tracking);
        tokio::time::timeout(Duration::from_secs(2), recorded)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.current_status().trip_exists);

        handle.shutdown();
        task.await.unwrap();
    }
}
