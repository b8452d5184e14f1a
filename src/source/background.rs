// src/source/background.rs
//! Background fix source: tracking delegated to an agent that outlives the UI

use super::{FixHandler, FixSource, StartOutcome, SubscriptionId, Subscribers};
use crate::{error::Result, gps::FixPoint, permission::PermissionProvider};
use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

/// Identifies one location delivery that the agent holds a wake lock for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundEvent {
    /// The agent confirmed that tracking is running
    Started,
    Location { task_id: TaskId, fix: FixPoint },
    Stopped,
    Error(String),
}

pub type BackgroundSink = Arc<dyn Fn(BackgroundEvent) + Send + Sync>;

/// Platform background location service
pub trait BackgroundAgent: Send + Sync {
    /// Ask the agent to begin tracking. Confirmation arrives later as
    /// [`BackgroundEvent::Started`] on `sink`.
    fn start(&self, sink: BackgroundSink) -> Result<()>;

    fn stop(&self);

    /// Release the hold taken for one location delivery.
    fn finish(&self, task_id: TaskId);
}

#[derive(Clone)]
pub struct BackgroundFixSource {
    inner: Arc<BackgroundInner>,
}

struct BackgroundInner {
    agent: Arc<dyn BackgroundAgent>,
    permissions: Arc<dyn PermissionProvider>,
    requested: AtomicBool,
    running: AtomicBool,
    subscribers: Subscribers,
}

/// Acknowledges a delivery when dropped, so the hold is released on every path
struct FinishOnDrop<'a> {
    agent: &'a dyn BackgroundAgent,
    task_id: TaskId,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.agent.finish(self.task_id);
    }
}

impl BackgroundFixSource {
    pub fn new(agent: Arc<dyn BackgroundAgent>, permissions: Arc<dyn PermissionProvider>) -> Self {
        Self {
            inner: Arc::new(BackgroundInner {
                agent,
                permissions,
                requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                subscribers: Subscribers::new(),
            }),
        }
    }
}

impl BackgroundInner {
    fn handle_event(&self, event: BackgroundEvent) {
        match event {
            BackgroundEvent::Started => {
                if self.requested.load(Ordering::SeqCst) {
                    self.running.store(true, Ordering::SeqCst);
                    info!("Background tracking confirmed");
                } else {
                    debug!("Background start confirmed after stop, ignored");
                }
            }
            BackgroundEvent::Location { task_id, fix } => {
                let _ack = FinishOnDrop {
                    agent: self.agent.as_ref(),
                    task_id,
                };
                if self.requested.load(Ordering::SeqCst) {
                    self.subscribers.notify(&fix);
                } else {
                    debug!("Background fix after stop dropped");
                }
            }
            BackgroundEvent::Stopped => {
                self.running.store(false, Ordering::SeqCst);
                self.requested.store(false, Ordering::SeqCst);
                info!("Background tracking stopped by agent");
            }
            BackgroundEvent::Error(message) => {
                warn!("Background geolocation error: {}", message);
            }
        }
    }
}

impl FixSource for BackgroundFixSource {
    fn name(&self) -> &'static str {
        "background"
    }

    fn start(&self) -> StartOutcome {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return StartOutcome::AlreadyActive;
        }

        let permission = self.inner.permissions.check_and_request().background;
        if !permission.is_granted() {
            self.inner.requested.store(false, Ordering::SeqCst);
            info!("Background tracking not started: permission {}", permission);
            return StartOutcome::PermissionDenied(permission);
        }

        let weak: Weak<BackgroundInner> = Arc::downgrade(&self.inner);
        let sink: BackgroundSink = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        });

        match self.inner.agent.start(sink) {
            Ok(()) => {
                info!("Background tracking requested");
                StartOutcome::Requested
            }
            Err(e) => {
                self.inner.requested.store(false, Ordering::SeqCst);
                warn!("Background agent failed to start: {}", e);
                StartOutcome::Unavailable(e.to_string())
            }
        }
    }

    fn stop(&self) {
        let was_requested = self.inner.requested.swap(false, Ordering::SeqCst);
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        if was_requested || was_running {
            self.inner.agent.stop();
            info!("Background tracking stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn is_pending(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst) && !self.inner.running.load(Ordering::SeqCst)
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
    use crate::source::ManualAgent;
    use chrono::Utc;
    use std::sync::Mutex;

    fn source_with(agent: &Arc<ManualAgent>) -> BackgroundFixSource {
        BackgroundFixSource::new(agent.clone(), Arc::new(ConfiguredPermissions::all_granted()))
    }

    #[test]
    fn test_active_only_after_confirmation() {
        let agent = Arc::new(ManualAgent::new());
        let source = source_with(&agent);

        assert_eq!(source.start(), StartOutcome::Requested);
        assert!(!source.is_active());
        assert!(source.is_pending());

        agent.confirm_started();
        assert!(source.is_active());
        assert!(!source.is_pending());
    }

    #[test]
    fn test_every_delivery_is_finished() {
        let agent = Arc::new(ManualAgent::new());
        let source = source_with(&agent);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source.subscribe(Arc::new(move |fix: &FixPoint| sink.lock().unwrap().push(*fix)));

        source.start();
        agent.confirm_started();
        let first = agent.push(FixPoint::new(1.0, 2.0, Utc::now())).unwrap();
        source.stop();
        // Delivered after stop: dropped, but still acknowledged
        let second = agent.push(FixPoint::new(1.0, 2.5, Utc::now())).unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(agent.finished_tasks(), vec![first, second]);
        assert_eq!(agent.outstanding_tasks(), 0);
    }

    #[test]
    fn test_ack_when_subscriber_panics() {
        let agent = Arc::new(ManualAgent::new());
        let source = source_with(&agent);
        source.subscribe(Arc::new(|_: &FixPoint| {
            panic!("subscriber failure");
        }));
        source.start();
        agent.confirm_started();

        let agent_clone = Arc::clone(&agent);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            agent_clone.push(FixPoint::new(1.0, 2.0, Utc::now()));
        }));

        assert!(result.is_err());
        assert_eq!(agent.outstanding_tasks(), 0);
    }

    #[test]
    fn test_permission_denied() {
        let agent = Arc::new(ManualAgent::new());
        let permissions =
            ConfiguredPermissions::new(PermissionState::Granted, PermissionState::Denied);
        let source = BackgroundFixSource::new(agent.clone(), Arc::new(permissions));

        assert_eq!(source.start(), StartOutcome::PermissionDenied(PermissionState::Denied));
        assert!(!agent.is_started());
    }

    #[test]
    fn test_agent_failure_is_unavailable() {
        let agent = Arc::new(ManualAgent::unavailable());
        let source = source_with(&agent);
        assert!(matches!(source.start(), StartOutcome::Unavailable(_)));
        assert!(!source.is_pending());
    }
}
