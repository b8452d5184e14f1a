// src/trips/mod.rs
//! Completed trips: storage and export

pub mod export;
pub mod store;

pub use export::{ExportFormat, TripExporter};
pub use store::{CompletedTrip, SqliteTripStore, TripStore};
