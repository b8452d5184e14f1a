// src/gps/mod.rs
//! GPS fix handling and receivers

pub mod data;
pub mod feed;
pub mod gpsd;
pub mod nmea;

pub use data::{FixPoint, PointNotice, PositionReport};
pub use feed::{FeedAgent, FeedWatcher, GpsFeed};
