// src/source/foreground.rs
//! Foreground fix source: active polling that needs the recorder to stay resident

use super::{FixHandler, FixSink, FixSource, StartOutcome, SubscriptionId, Subscribers};
use crate::{
    error::Result,
    gps::FixPoint,
    permission::PermissionProvider,
};
use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Platform position polling, the foreground location API
pub trait PositionWatcher: Send + Sync {
    /// Begin delivering positions to `sink` until [`clear_watch`](Self::clear_watch).
    fn watch(&self, sink: FixSink) -> Result<WatchId>;

    fn clear_watch(&self, id: WatchId);
}

#[derive(Clone)]
pub struct ForegroundFixSource {
    inner: Arc<ForegroundInner>,
}

struct ForegroundInner {
    watcher: Arc<dyn PositionWatcher>,
    permissions: Arc<dyn PermissionProvider>,
    watch_id: Mutex<Option<WatchId>>,
    active: AtomicBool,
    last_position: Mutex<Option<(f64, f64)>>,
    subscribers: Subscribers,
}

impl ForegroundFixSource {
    pub fn new(
        watcher: Arc<dyn PositionWatcher>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(ForegroundInner {
                watcher,
                permissions,
                watch_id: Mutex::new(None),
                active: AtomicBool::new(false),
                last_position: Mutex::new(None),
                subscribers: Subscribers::new(),
            }),
        }
    }
}

impl ForegroundInner {
    fn deliver(&self, fix: FixPoint) {
        if !self.active.load(Ordering::SeqCst) {
            debug!("Foreground fix after stop dropped");
            return;
        }

        {
            let mut last = self.last_position.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some((fix.latitude, fix.longitude)) {
                debug!("Foreground fix repeats previous position, suppressed");
                return;
            }
            *last = Some((fix.latitude, fix.longitude));
        }

        self.subscribers.notify(&fix);
    }
}

impl FixSource for ForegroundFixSource {
    fn name(&self) -> &'static str {
        "foreground"
    }

    fn start(&self) -> StartOutcome {
        let mut watch_id = self.inner.watch_id.lock().unwrap_or_else(PoisonError::into_inner);
        if watch_id.is_some() {
            return StartOutcome::AlreadyActive;
        }

        let permission = self.inner.permissions.check_and_request().foreground;
        if !permission.is_granted() {
            info!("Foreground tracking not started: permission {}", permission);
            return StartOutcome::PermissionDenied(permission);
        }

        let weak: Weak<ForegroundInner> = Arc::downgrade(&self.inner);
        let sink: FixSink = Arc::new(move |fix| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(fix);
            }
        });

        // Mark active first so a watcher that answers immediately is not dropped
        self.inner.active.store(true, Ordering::SeqCst);
        match self.inner.watcher.watch(sink) {
            Ok(id) => {
                *watch_id = Some(id);
                info!("Foreground tracking started");
                StartOutcome::Requested
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                warn!("Foreground watcher failed to start: {}", e);
                StartOutcome::Unavailable(e.to_string())
            }
        }
    }

    fn stop(&self) {
        let id = self
            .inner
            .watch_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.active.store(false, Ordering::SeqCst);
        if let Some(id) = id {
            self.inner.watcher.clear_watch(id);
            info!("Foreground tracking stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self, handler: FixHandler) -> SubscriptionId {
        self.inner.subscribers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscribers.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{ConfiguredPermissions, PermissionState};
    use crate::source::ManualWatcher;
    use chrono::{Duration, TimeZone, Utc};

    fn collecting(source: &ForegroundFixSource) -> Arc<Mutex<Vec<FixPoint>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source.subscribe(Arc::new(move |fix: &FixPoint| sink.lock().unwrap().push(*fix)));
        seen
    }

    #[test]
    fn test_identical_position_suppressed() {
        let watcher = Arc::new(ManualWatcher::new());
        let permissions = Arc::new(ConfiguredPermissions::all_granted());
        let source = ForegroundFixSource::new(watcher.clone(), permissions);
        let seen = collecting(&source);

        assert_eq!(source.start(), StartOutcome::Requested);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        watcher.push(FixPoint::new(45.0, 7.0, t0));
        watcher.push(FixPoint::new(45.0, 7.0, t0 + Duration::seconds(5)));
        watcher.push(FixPoint::new(45.0, 7.0001, t0 + Duration::seconds(10)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].timestamp, t0);
    }

    #[test]
    fn test_permission_denied_does_not_activate() {
        let watcher = Arc::new(ManualWatcher::new());
        let permissions =
            ConfiguredPermissions::new(PermissionState::Blocked, PermissionState::Blocked);
        let source = ForegroundFixSource::new(watcher.clone(), Arc::new(permissions));

        assert_eq!(source.start(), StartOutcome::PermissionDenied(PermissionState::Blocked));
        assert!(!source.is_active());
        assert!(!watcher.is_watching());
    }

    #[test]
    fn test_stop_is_idempotent_and_silences() {
        let watcher = Arc::new(ManualWatcher::new());
        let permissions = Arc::new(ConfiguredPermissions::all_granted());
        let source = ForegroundFixSource::new(watcher.clone(), permissions);
        let seen = collecting(&source);

        source.start();
        assert_eq!(source.start(), StartOutcome::AlreadyActive);
        source.stop();
        source.stop();
        watcher.push(FixPoint::new(1.0, 1.0, Utc::now()));

        assert!(!source.is_active());
        assert!(seen.lock().unwrap().is_empty());
    }
}
