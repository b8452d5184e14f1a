// src/gps/feed.rs
//! Live GPS feeds (serial NMEA receivers and gpsd) wired up as fix drivers

use super::{data::FixPoint, gpsd, nmea::NmeaDecoder};
use crate::{
    config::RecorderConfig,
    error::{Result, TripError},
    source::{
        runtime_handle, BackgroundAgent, BackgroundEvent, BackgroundSink, FixSink, PositionWatcher,
        TaskId, WatchId,
    },
};
use log::{info, warn};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// GPS data source configuration
#[derive(Debug, Clone, PartialEq)]
pub enum GpsFeed {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
}

/// What a running feed reports back
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Fix(FixPoint),
    Closed(Option<String>),
}

impl GpsFeed {
    pub fn from_config(config: &RecorderConfig) -> Result<Self> {
        match config.source_type.as_str() {
            "serial" => {
                let port = config.serial_port.clone().ok_or_else(|| {
                    TripError::Other(
                        "serial source selected but no serial_port configured".to_string(),
                    )
                })?;
                Ok(GpsFeed::Serial {
                    port,
                    baudrate: config.serial_baudrate.unwrap_or(9600),
                })
            }
            "gpsd" => Ok(GpsFeed::Gpsd {
                host: config.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: config.gpsd_port.unwrap_or(2947),
            }),
            other => Err(TripError::Other(format!("Unknown source type: {}", other))),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            GpsFeed::Serial { port, baudrate } => format!("serial {} @ {} baud", port, baudrate),
            GpsFeed::Gpsd { host, port } => format!("gpsd {}:{}", host, port),
        }
    }

    /// Spawn a reader task on the current runtime. It runs until the
    /// connection closes or the returned handle is aborted.
    pub fn spawn<F>(&self, on_event: F) -> Result<JoinHandle<()>>
    where
        F: FnMut(FeedEvent) + Send + 'static,
    {
        let handle = runtime_handle()?;
        let feed = self.clone();
        Ok(handle.spawn(async move { feed.run(on_event).await }))
    }

    async fn run<F>(self, mut on_event: F)
    where
        F: FnMut(FeedEvent) + Send + 'static,
    {
        let outcome = match &self {
            GpsFeed::Serial { port, baudrate } => read_serial(port, *baudrate, &mut on_event).await,
            GpsFeed::Gpsd { host, port } => read_gpsd(host, *port, &mut on_event).await,
        };
        match outcome {
            Ok(()) => on_event(FeedEvent::Closed(None)),
            Err(e) => {
                warn!("GPS feed {} ended: {}", self.describe(), e);
                on_event(FeedEvent::Closed(Some(e.to_string())));
            }
        }
    }
}

/// Read NMEA sentences from a serial GPS receiver
async fn read_serial<F>(port: &str, baudrate: u32, on_event: &mut F) -> Result<()>
where
    F: FnMut(FeedEvent) + Send,
{
    info!("Connecting to GPS on {} at {} baud...", port, baudrate);

    let serial = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(1000))
        .open_native_async()
        .map_err(|e| TripError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

    on_event(FeedEvent::Connected);

    let mut reader = BufReader::new(serial);
    let mut decoder = NmeaDecoder::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(()); // EOF
        }
        if let Some(fix) = decoder.feed(&line) {
            on_event(FeedEvent::Fix(fix));
        }
    }
}

/// Read TPV reports from a gpsd daemon
async fn read_gpsd<F>(host: &str, port: u16, on_event: &mut F) -> Result<()>
where
    F: FnMut(FeedEvent) + Send,
{
    info!("Connecting to gpsd at {}:{}...", host, port);

    let mut reader = gpsd::connect_gpsd(host, port).await?;
    on_event(FeedEvent::Connected);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(()); // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match gpsd::parse_gpsd_json(line) {
            Ok(Some(fix)) => on_event(FeedEvent::Fix(fix)),
            Ok(None) => {}
            Err(e) => warn!("Error parsing gpsd JSON: {}", e),
        }
    }
}

/// Foreground position watcher backed by a live feed
pub struct FeedWatcher {
    feed: GpsFeed,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl FeedWatcher {
    pub fn new(feed: GpsFeed) -> Self {
        Self {
            feed,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl PositionWatcher for FeedWatcher {
    fn watch(&self, sink: FixSink) -> Result<WatchId> {
        let task = self.feed.spawn(move |event| {
            if let FeedEvent::Fix(fix) = event {
                sink(fix);
            }
        })?;
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Some(task) = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        {
            task.abort();
        }
    }
}

/// Background agent backed by a live feed.
///
/// Every delivered fix is held as an outstanding task until the source calls
/// [`BackgroundAgent::finish`].
pub struct FeedAgent {
    feed: GpsFeed,
    next_task: Arc<AtomicU64>,
    outstanding: Arc<Mutex<HashSet<TaskId>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedAgent {
    pub fn new(feed: GpsFeed) -> Self {
        Self {
            feed,
            next_task: Arc::new(AtomicU64::new(1)),
            outstanding: Arc::new(Mutex::new(HashSet::new())),
            task: Mutex::new(None),
        }
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl BackgroundAgent for FeedAgent {
    fn start(&self, sink: BackgroundSink) -> Result<()> {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let next_task = Arc::clone(&self.next_task);
        let outstanding = Arc::clone(&self.outstanding);
        let task = self.feed.spawn(move |event| match event {
            FeedEvent::Connected => sink(BackgroundEvent::Started),
            FeedEvent::Fix(fix) => {
                let task_id = TaskId(next_task.fetch_add(1, Ordering::Relaxed));
                outstanding
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(task_id);
                sink(BackgroundEvent::Location { task_id, fix });
            }
            FeedEvent::Closed(reason) => {
                if let Some(reason) = reason {
                    sink(BackgroundEvent::Error(reason));
                }
                sink(BackgroundEvent::Stopped);
            }
        })?;
        *slot = Some(task);
        Ok(())
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }

    fn finish(&self, task_id: TaskId) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_from_config() {
        let mut config = RecorderConfig::default();
        config.update_gpsd("gps.local".to_string(), 3000);
        assert_eq!(
            GpsFeed::from_config(&config).unwrap(),
            GpsFeed::Gpsd {
                host: "gps.local".to_string(),
                port: 3000
            }
        );

        config.update_serial("/dev/ttyUSB0".to_string(), 115200);
        assert_eq!(
            GpsFeed::from_config(&config).unwrap().describe(),
            "serial /dev/ttyUSB0 @ 115200 baud"
        );
    }

    #[test]
    fn test_serial_without_port_rejected() {
        let mut config = RecorderConfig::default();
        config.source_type = "serial".to_string();
        config.serial_port = None;
        assert!(GpsFeed::from_config(&config).is_err());
    }

    #[test]
    fn test_watch_without_runtime_is_unavailable() {
        let watcher = FeedWatcher::new(GpsFeed::Gpsd {
            host: "localhost".to_string(),
            port: 2947,
        });
        let result = watcher.watch(Arc::new(|_: FixPoint| {}));
        assert!(matches!(result, Err(TripError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_agent_reports_closed_connection() {
        // Nothing listens on this port; the feed closes with an error
        let agent = FeedAgent::new(GpsFeed::Gpsd {
            host: "127.0.0.1".to_string(),
            port: 1,
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        agent
            .start(Arc::new(move |event: BackgroundEvent| {
                let _ = tx.send(event);
            }))
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BackgroundEvent::Error(_)));
        assert_eq!(rx.recv().await.unwrap(), BackgroundEvent::Stopped);
        assert_eq!(agent.outstanding_tasks(), 0);
    }
}
