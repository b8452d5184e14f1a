// src/lib.rs
//! Trip Recorder Library
//!
//! Records GPS trips into a crash-durable buffer from a foreground or a
//! background fix source, and turns finished trips into stored records with
//! their duration and distance.

pub mod config;
pub mod display;
pub mod error;
pub mod finalize;
pub mod gps;
pub mod permission;
pub mod recorder;
pub mod source;
pub mod storage;
pub mod trips;

// Re-export main types for convenience
pub use config::RecorderConfig;
pub use error::{Result, TripError};
pub use finalize::{haversine_distance, TripFinalizer, TripSummary};
pub use gps::{FixPoint, PointNotice};
pub use recorder::{
    RecorderHandle, RecorderParts, RecorderService, RecordingState, TrackingStatus, TripRecorder,
};
pub use storage::{BufferMode, FixBuffer};
pub use trips::{CompletedTrip, SqliteTripStore, TripStore};
