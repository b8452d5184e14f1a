// src/source/manual.rs
//! In-process drivers that emit fixes pushed by the caller.
//!
//! Used to replay recorded trips through the recorder and to drive the
//! recorder deterministically in tests.

use super::{
    background::{BackgroundAgent, BackgroundEvent, BackgroundSink, TaskId},
    foreground::{PositionWatcher, WatchId},
    FixSink,
};
use crate::{
    error::{Result, TripError},
    gps::FixPoint,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

/// Position watcher fed by [`ManualWatcher::push`]
#[derive(Default)]
pub struct ManualWatcher {
    next_id: AtomicU64,
    sinks: Mutex<HashMap<WatchId, FixSink>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_watching(&self) -> bool {
        !self.sinks.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Deliver a fix to every active watch. Returns false if nobody watches.
    pub fn push(&self, fix: FixPoint) -> bool {
        let sinks: Vec<FixSink> = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for sink in &sinks {
            sink(fix);
        }
        !sinks.is_empty()
    }
}

impl PositionWatcher for ManualWatcher {
    fn watch(&self, sink: FixSink) -> Result<WatchId> {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Background agent whose confirmations and deliveries are triggered by hand
pub struct ManualAgent {
    available: bool,
    started: AtomicBool,
    sink: Mutex<Option<BackgroundSink>>,
    next_task: AtomicU64,
    outstanding: Mutex<HashSet<TaskId>>,
    finished: Mutex<Vec<TaskId>>,
}

impl Default for ManualAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualAgent {
    pub fn new() -> Self {
        Self {
            available: true,
            started: AtomicBool::new(false),
            sink: Mutex::new(None),
            next_task: AtomicU64::new(1),
            outstanding: Mutex::new(HashSet::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// An agent that refuses to start, as on platforms without background tracking
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn current_sink(&self) -> Option<BackgroundSink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn confirm_started(&self) {
        if let Some(sink) = self.current_sink() {
            sink(BackgroundEvent::Started);
        }
    }

    /// Report that tracking ended on the agent side
    pub fn report_stopped(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Some(sink) = self.current_sink() {
            sink(BackgroundEvent::Stopped);
        }
    }

    /// Deliver a fix. Late deliveries after `stop` still reach the source,
    /// as they can on a real platform.
    pub fn push(&self, fix: FixPoint) -> Option<TaskId> {
        let sink = self.current_sink()?;
        let task_id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id);
        sink(BackgroundEvent::Location { task_id, fix });
        Some(task_id)
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn finished_tasks(&self) -> Vec<TaskId> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl BackgroundAgent for ManualAgent {
    fn start(&self, sink: BackgroundSink) -> Result<()> {
        if !self.available {
            return Err(TripError::SourceUnavailable(
                "background tracking not supported".to_string(),
            ));
        }
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn finish(&self, task_id: TaskId) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task_id);
    }
}
