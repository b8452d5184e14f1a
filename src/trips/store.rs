// src/trips/store.rs
//! Durable table of completed trips

use crate::{
    error::{Result, TripError},
    gps::data::{decode_sequence, encode_sequence, FixPoint},
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Mutex, PoisonError},
};

/// A finished trip with its metrics and raw fixes
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTrip {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub distance_meters: f64,
    pub points: Vec<FixPoint>,
}

impl CompletedTrip {
    /// `1h 2m 3s`, `2m 3s` or `3s`
    pub fn format_duration(&self) -> String {
        let total = self.duration_seconds.max(0);
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}

/// Storage for completed trips
pub trait TripStore: Send + Sync {
    fn insert(
        &self,
        start_time: DateTime<Utc>,
        duration_seconds: i64,
        distance_meters: f64,
        points: &[FixPoint],
    ) -> Result<i64>;

    /// Most recent first
    fn list_all(&self) -> Result<Vec<CompletedTrip>>;

    fn get(&self, id: i64) -> Result<Option<CompletedTrip>>;

    /// Returns whether a trip was removed
    fn delete(&self, id: i64) -> Result<bool>;

    fn clear_all(&self) -> Result<usize>;
}

type TripRow = (i64, String, i64, f64, String);

pub struct SqliteTripStore {
    db: Mutex<Connection>,
}

impl SqliteTripStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            db: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        debug!("Opened trip store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                duration INTEGER NOT NULL,
                distance REAL NOT NULL,
                points TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_trip((id, date, duration, distance, points): TripRow) -> Result<CompletedTrip> {
        let start_time = DateTime::parse_from_rfc3339(&date)
            .map_err(|e| TripError::Parse(format!("Trip {} has invalid date {}: {}", id, date, e)))?
            .with_timezone(&Utc);
        Ok(CompletedTrip {
            id,
            start_time,
            duration_seconds: duration,
            distance_meters: distance,
            points: decode_sequence(&points)?,
        })
    }
}

impl TripStore for SqliteTripStore {
    fn insert(
        &self,
        start_time: DateTime<Utc>,
        duration_seconds: i64,
        distance_meters: f64,
        points: &[FixPoint],
    ) -> Result<i64> {
        let encoded = encode_sequence(points)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO trips (date, duration, distance, points) VALUES (?1, ?2, ?3, ?4)",
            params![start_time.to_rfc3339(), duration_seconds, distance_meters, encoded],
        )?;
        let id = conn.last_insert_rowid();
        info!("Saved trip {} ({} fixes)", id, points.len());
        Ok(id)
    }

    fn list_all(&self) -> Result<Vec<CompletedTrip>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, date, duration, distance, points FROM trips ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<std::result::Result<Vec<TripRow>, _>>()?;
        rows.into_iter().map(Self::row_to_trip).collect()
    }

    fn get(&self, id: i64) -> Result<Option<CompletedTrip>> {
        let row: Option<TripRow> = self
            .conn()
            .query_row(
                "SELECT id, date, duration, distance, points FROM trips WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        row.map(Self::row_to_trip).transpose()
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let removed = self.conn().execute("DELETE FROM trips WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn clear_all(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM trips", [])?)
    }
}
