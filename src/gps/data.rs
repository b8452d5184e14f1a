// src/gps/data.rs
//! GPS fix structures

use crate::error::{Result, TripError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single GPS observation.
///
/// Field names on the wire are the short ones used by the trip buffer files
/// (`lat`, `lng`, `timestamp`, `accuracy`, `speed`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "accuracy", default)]
    pub accuracy_m: Option<f64>,
    #[serde(rename = "speed", default)]
    pub speed_mps: Option<f64>,
}

impl FixPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy_m: None,
            speed_mps: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_m = Some(meters);
        self
    }

    pub fn with_speed(mut self, meters_per_second: f64) -> Self {
        self.speed_mps = Some(meters_per_second);
        self
    }

    /// Exact coordinate equality, no tolerance.
    pub fn same_position(&self, other: &FixPoint) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }

    pub fn notice(&self) -> PointNotice {
        PointNotice {
            lat: self.latitude,
            lng: self.longitude,
        }
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:.5}", coord)
    }
}

/// Decode a stored fix sequence. An empty string is an empty sequence.
pub fn decode_sequence(content: &str) -> Result<Vec<FixPoint>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(content)
        .map_err(|e| TripError::Serialization(format!("Invalid fix sequence: {}", e)))
}

pub fn encode_sequence(fixes: &[FixPoint]) -> Result<String> {
    serde_json::to_string(fixes)
        .map_err(|e| TripError::Serialization(format!("Failed to encode fixes: {}", e)))
}

/// Lightweight notification sent to recorder subscribers for every accepted fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointNotice {
    pub lat: f64,
    pub lng: f64,
}

/// Position fields gathered from a receiver, possibly over several sentences
#[derive(Debug, Clone, Default)]
pub struct PositionReport {
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_mps: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub fix_quality: Option<u8>, // NMEA GGA quality
    pub mode: Option<u8>,        // gpsd TPV mode
}

impl PositionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the report carries a usable position
    pub fn has_fix(&self) -> bool {
        if self.latitude.is_none() || self.longitude.is_none() {
            return false;
        }
        match (self.fix_quality, self.mode) {
            (Some(0), _) => false,
            (_, Some(m)) if m < 2 => false,
            _ => true,
        }
    }

    /// Build a fix, stamping it with `now` when the receiver gave no time.
    pub fn to_fix(&self, now: DateTime<Utc>) -> Option<FixPoint> {
        if !self.has_fix() {
            return None;
        }
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(FixPoint {
            latitude,
            longitude,
            timestamp: self.timestamp.unwrap_or(now),
            accuracy_m: self.accuracy_m,
            speed_mps: self.speed_mps,
        })
    }
}
