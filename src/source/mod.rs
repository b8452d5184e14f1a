// src/source/mod.rs
//! Fix sources
//!
//! Two sources produce fixes for the recorder: a foreground source that polls
//! an active position watcher, and a background source delegated to an agent
//! that keeps running while the recorder's host is suspended. Both share the
//! [`FixSource`] contract so the recorder can treat them alike.

pub mod background;
pub mod foreground;
pub mod manual;

use crate::{error::Result, gps::FixPoint, permission::PermissionState};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

pub use background::{BackgroundAgent, BackgroundEvent, BackgroundFixSource, BackgroundSink, TaskId};
pub use foreground::{ForegroundFixSource, PositionWatcher, WatchId};
pub use manual::{ManualAgent, ManualWatcher};

/// Callback a driver uses to hand raw fixes to a source
pub type FixSink = Arc<dyn Fn(FixPoint) + Send + Sync>;

/// Subscriber callback, invoked once per accepted fix
pub type FixHandler = Arc<dyn Fn(&FixPoint) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of asking a source to start. Starting never fails hard; the caller
/// decides whether to fall back or explain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Activation requested; the source may confirm asynchronously
    Requested,
    AlreadyActive,
    PermissionDenied(PermissionState),
    Unavailable(String),
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Requested | StartOutcome::AlreadyActive)
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Requested => write!(f, "requested"),
            StartOutcome::AlreadyActive => write!(f, "already active"),
            StartOutcome::PermissionDenied(state) => write!(f, "permission {}", state),
            StartOutcome::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Common contract of the foreground and background sources
pub trait FixSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn start(&self) -> StartOutcome;

    /// Stop producing fixes. Idempotent.
    fn stop(&self);

    fn is_active(&self) -> bool;

    /// Start was requested but the source has not confirmed it yet
    fn is_pending(&self) -> bool {
        false
    }

    fn subscribe(&self, handler: FixHandler) -> SubscriptionId;

    /// Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Subscriber registry shared by both source implementations
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, FixHandler)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: FixHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler. Handlers run outside the registry lock so they may
    /// subscribe or unsubscribe themselves.
    pub fn notify(&self, fix: &FixPoint) {
        let handlers: Vec<FixHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(fix);
        }
    }
}

/// Run on the current tokio runtime, or report why a live driver cannot start.
pub(crate) fn runtime_handle() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|e| {
        crate::error::TripError::SourceUnavailable(format!("no async runtime: {}", e))
    })
}
