// src/finalize.rs
//! Reduction of a recorded fix sequence into a completed trip

use crate::{
    error::{Result, TripError},
    gps::FixPoint,
    trips::{CompletedTrip, TripStore},
};
use chrono::{DateTime, Utc};
use log::info;

/// Great-circle distance in meters between two points given in degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.0; // Earth's radius in meters

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    R * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripSummary {
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub distance_meters: f64,
}

/// Duration and distance of a non-empty fix sequence
pub fn summarize(fixes: &[FixPoint]) -> Result<TripSummary> {
    let (first, last) = match (fixes.first(), fixes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(TripError::EmptyTrip),
    };

    let duration_seconds = (last.timestamp - first.timestamp).num_seconds().max(0);
    let distance_meters = fixes
        .windows(2)
        .map(|pair| {
            let (from, to) = (&pair[0], &pair[1]);
            haversine_distance(from.latitude, from.longitude, to.latitude, to.longitude)
        })
        .sum();

    Ok(TripSummary {
        start_time: first.timestamp,
        duration_seconds,
        distance_meters,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TripFinalizer;

impl TripFinalizer {
    pub fn new() -> Self {
        Self
    }

    /// Summarize `fixes` and persist them. Store failures are returned as-is;
    /// nothing is retried here.
    pub fn finalize(&self, fixes: &[FixPoint], store: &dyn TripStore) -> Result<CompletedTrip> {
        let summary = summarize(fixes)?;
        let id = store.insert(
            summary.start_time,
            summary.duration_seconds,
            summary.distance_meters,
            fixes,
        )?;

        info!(
            "Finalized trip {}: {} fixes, {}s, {:.1} m",
            id,
            fixes.len(),
            summary.duration_seconds,
            summary.distance_meters
        );

        Ok(CompletedTrip {
            id,
            start_time: summary.start_time,
            duration_seconds: summary.duration_seconds,
            distance_meters: summary.distance_meters,
            points: fixes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trips::SqliteTripStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_two_fixes_at_equator() {
        let fixes = [
            FixPoint::new(0.0, 0.0, t0()),
            FixPoint::new(0.0, 0.001, t0() + Duration::seconds(10)),
        ];
        let summary = summarize(&fixes).unwrap();
        assert_eq!(summary.duration_seconds, 10);
        assert!((summary.distance_meters - 111.19).abs() < 0.01);
        assert_eq!(summary.start_time, t0());
    }

    #[test]
    fn test_single_fix() {
        let summary = summarize(&[FixPoint::new(48.2, 16.3, t0())]).unwrap();
        assert_eq!(summary.duration_seconds, 0);
        assert_eq!(summary.distance_meters, 0.0);
    }

    #[test]
    fn test_duration_is_floored() {
        let fixes = [
            FixPoint::new(1.0, 1.0, t0()),
            FixPoint::new(1.0, 1.0, t0() + Duration::milliseconds(9_999)),
        ];
        let summary = summarize(&fixes).unwrap();
        assert_eq!(summary.duration_seconds, 9);
        assert_eq!(summary.distance_meters, 0.0);
    }

    #[test]
    fn test_empty_is_error() {
        assert!(matches!(summarize(&[]), Err(TripError::EmptyTrip)));
    }

    #[test]
    fn test_finalize_persists() {
        let store = SqliteTripStore::in_memory().unwrap();
        let fixes = [
            FixPoint::new(0.0, 0.0, t0()),
            FixPoint::new(0.0, 0.001, t0() + Duration::seconds(10)),
        ];

        let trip = TripFinalizer::new().finalize(&fixes, &store).unwrap();
        let stored = store.get(trip.id).unwrap().unwrap();
        assert_eq!(stored.duration_seconds, 10);
        assert_eq!(stored.points.len(), 2);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 1.0);
    }
}
