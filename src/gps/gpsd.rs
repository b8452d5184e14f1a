// src/gps/gpsd.rs
//! GPSD client implementation

use super::data::{FixPoint, PositionReport};
use crate::error::{Result, TripError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            TripError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e))
        })?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TripError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data.
///
/// Only TPV reports with a 2D or 3D fix produce a [`FixPoint`].
pub fn parse_gpsd_json(line: &str) -> Result<Option<FixPoint>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TripError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data).to_fix(Utc::now())),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                info!("Connected to gpsd version: {}", version);
            }
            Ok(None)
        }
        "DEVICES" => {
            if let Some(devices) = msg.data.get("devices").and_then(|v| v.as_array()) {
                debug!("gpsd managing {} device(s)", devices.len());
            }
            Ok(None)
        }
        // Ignore SKY, WATCH and unknown message types
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> PositionReport {
    let mut report = PositionReport::new();

    report.latitude = msg_data.get("lat").and_then(|v| v.as_f64());
    report.longitude = msg_data.get("lon").and_then(|v| v.as_f64());
    report.speed_mps = msg_data.get("speed").and_then(|v| v.as_f64());
    report.mode = msg_data.get("mode").and_then(|v| v.as_u64()).map(|m| m as u8);

    // Horizontal error estimate; older daemons only report per-axis errors
    report.accuracy_m = msg_data.get("eph").and_then(|v| v.as_f64()).or_else(|| {
        let epx = msg_data.get("epx").and_then(|v| v.as_f64())?;
        let epy = msg_data.get("epy").and_then(|v| v.as_f64())?;
        Some(epx.max(epy))
    });

    report.timestamp = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    report
}
