// src/trips/export.rs
//! Completed trip export

use super::CompletedTrip;
use crate::{
    error::{Result, TripError},
    gps::FixPoint,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Gpx,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Gpx => "gpx",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Gpx => "GPX (GPS Exchange)",
            ExportFormat::GeoJson => "GeoJSON",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "gpx" => Some(ExportFormat::Gpx),
            "geojson" | "json" => Some(ExportFormat::GeoJson),
            _ => None,
        }
    }
}

/// Writes completed trips into a user-visible directory
pub struct TripExporter {
    out_dir: PathBuf,
}

impl TripExporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn file_name(trip: &CompletedTrip, format: ExportFormat) -> String {
        format!("trip_{}.{}", trip.id, format.extension())
    }

    /// Write `trip` and return the path of the created file
    pub fn export(&self, trip: &CompletedTrip, format: ExportFormat) -> Result<PathBuf> {
        if trip.points.is_empty() {
            return Err(TripError::Export(format!("Trip {} has no points", trip.id)));
        }

        let content = match format {
            ExportFormat::Csv => to_csv(trip)?,
            ExportFormat::Gpx => to_gpx(trip),
            ExportFormat::GeoJson => to_geojson(trip)?,
        };

        fs::create_dir_all(&self.out_dir).map_err(|e| {
            TripError::Export(format!("Cannot create {}: {}", self.out_dir.display(), e))
        })?;
        let path = self.out_dir.join(Self::file_name(trip, format));
        fs::write(&path, content)
            .map_err(|e| TripError::Export(format!("Cannot write {}: {}", path.display(), e)))?;

        Ok(path)
    }
}

const CSV_HEADER: [&str; 3] = ["latitude", "longitude", "timestamp"];

/// One row of an exported trip; extra columns are ignored on import
#[derive(Debug, Deserialize)]
struct CsvRow {
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
}

pub fn to_csv(trip: &CompletedTrip) -> Result<String> {
    let csv_error = |e: csv::Error| TripError::Export(format!("CSV write failed: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for fix in &trip.points {
        writer
            .write_record([
                fix.latitude.to_string(),
                fix.longitude.to_string(),
                fix.timestamp.to_rfc3339(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TripError::Export(format!("CSV write failed: {}", e.error())))?;
    String::from_utf8(bytes).map_err(|e| TripError::Export(format!("CSV is not UTF-8: {}", e)))
}

/// Read fixes back from a CSV with a `latitude,longitude,timestamp` header
pub fn parse_csv(content: &str) -> Result<Vec<FixPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut fixes = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| match e.position() {
            Some(pos) => TripError::Parse(format!("line {}: {}", pos.line(), e)),
            None => TripError::Parse(e.to_string()),
        })?;
        fixes.push(FixPoint::new(row.latitude, row.longitude, row.timestamp));
    }
    Ok(fixes)
}

pub fn to_gpx(trip: &CompletedTrip) -> String {
    let mut gpx = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Trip Recorder" xmlns="http://www.topografix.com/GPX/1/1">
"#,
    );
    gpx.push_str(&format!(
        "  <trk>\n    <name>{}</name>\n    <trkseg>\n",
        escape_xml(&format!("Trip {} ({})", trip.id, trip.start_time.format("%Y-%m-%d %H:%M")))
    ));

    for fix in &trip.points {
        gpx.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n        <time>{}</time>\n",
            fix.latitude,
            fix.longitude,
            fix.timestamp.to_rfc3339()
        ));
        if let Some(speed) = fix.speed_mps {
            gpx.push_str(&format!("        <speed>{}</speed>\n", speed));
        }
        gpx.push_str("      </trkpt>\n");
    }

    gpx.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    gpx
}

pub fn to_geojson(trip: &CompletedTrip) -> Result<String> {
    let coordinates: Vec<[f64; 2]> = trip
        .points
        .iter()
        .map(|fix| [fix.longitude, fix.latitude])
        .collect();
    let times: Vec<String> = trip.points.iter().map(|fix| fix.timestamp.to_rfc3339()).collect();

    let feature = serde_json::json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates
        },
        "properties": {
            "id": trip.id,
            "start_time": trip.start_time.to_rfc3339(),
            "duration_seconds": trip.duration_seconds,
            "distance_meters": trip.distance_meters,
            "times": times
        }
    });

    Ok(serde_json::to_string_pretty(&feature)?)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
