// src/gps/nmea.rs
//! NMEA sentence parsing

use super::data::{FixPoint, PositionReport};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

const KNOTS_TO_MPS: f64 = 0.514_444;

/// Turns a stream of NMEA sentences into fixes.
///
/// GGA updates fix quality, RMC carries date, time and speed and emits the fix.
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    report: PositionReport,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sentence; returns a fix once an RMC sentence completes one.
    pub fn feed(&mut self, line: &str) -> Option<FixPoint> {
        let line = line.trim();
        let body = line.split('*').next().unwrap_or(line);
        let parts: Vec<&str> = body.split(',').collect();

        if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
            parse_gga(&mut self.report, &parts);
            None
        } else if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
            if !parse_rmc(&mut self.report, &parts) {
                return None;
            }
            self.report.to_fix(Utc::now())
        } else {
            None
        }
    }
}

/// Parse ddmm.mmmm / dddmm.mmmm with hemisphere
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let coord = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => Some(-coord),
        _ => Some(coord),
    }
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(report: &mut PositionReport, parts: &[&str]) {
    if parts.len() < 10 {
        return;
    }

    if let Some(lat) = parse_coordinate(parts[2], parts[3]) {
        report.latitude = Some(lat);
    }
    if let Some(lon) = parse_coordinate(parts[4], parts[5]) {
        report.longitude = Some(lon);
    }

    // Fix quality (field 6)
    if let Ok(quality) = parts[6].parse::<u8>() {
        report.fix_quality = Some(quality);
    }
}

/// Parse RMC (Recommended Minimum) sentence. Returns false for void fixes.
fn parse_rmc(report: &mut PositionReport, parts: &[&str]) -> bool {
    if parts.len() < 10 {
        return false;
    }

    // Status A = valid, V = void
    if parts[2] != "A" {
        return false;
    }

    match (parse_coordinate(parts[3], parts[4]), parse_coordinate(parts[5], parts[6])) {
        (Some(lat), Some(lon)) => {
            report.latitude = Some(lat);
            report.longitude = Some(lon);
        }
        _ => return false,
    }

    // Speed over ground in knots (field 7)
    report.speed_mps = parts[7].parse::<f64>().ok().map(|knots| knots * KNOTS_TO_MPS);
    report.timestamp = parse_rmc_time(parts[1], parts[9]);
    true
}

fn parse_rmc_time(time: &str, date: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H%M%S"))
        .ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gga_then_rmc() {
        let mut decoder = NmeaDecoder::new();
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        assert!(decoder.feed(gga).is_none());

        let rmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let fix = decoder.feed(rmc).expect("fix");

        assert!((fix.latitude - 48.1173).abs() < 0.0001);
        assert!((fix.longitude - 11.516_666).abs() < 0.0001);
        assert!((fix.speed_mps.unwrap() - 11.523).abs() < 0.01);
        assert_eq!(fix.timestamp.to_rfc3339(), "1994-03-23T12:35:19+00:00");
    }

    #[test]
    fn test_void_rmc_is_ignored() {
        let mut decoder = NmeaDecoder::new();
        let rmc = "$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        assert!(decoder.feed(rmc).is_none());
    }

    #[test]
    fn test_no_fix_quality_suppresses() {
        let mut decoder = NmeaDecoder::new();
        decoder.feed("$GPGGA,123519,4807.038,N,01131.000,E,0,00,,,M,,M,,*47");
        let rmc = "$GPRMC,123519,A,4807.038,S,01131.000,W,0.0,084.4,230394,003.1,W*6A";
        assert!(decoder.feed(rmc).is_none());
    }

    #[test]
    fn test_southern_western_hemisphere() {
        assert!(parse_coordinate("3351.000", "S").unwrap() < 0.0);
        assert!(parse_coordinate("15112.000", "W").unwrap() < 0.0);
        assert!(parse_coordinate("", "N").is_none());
    }

    #[test]
    fn test_invalid_sentence() {
        let mut decoder = NmeaDecoder::new();
        assert!(decoder.feed("$INVALID,123,456").is_none());
    }
}
