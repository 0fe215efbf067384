//! GPX sample extraction and the planar distance between positions.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OdometerError;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl Position {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }

    /// Surface distance in meters, ignoring elevation.
    pub fn distance_m(&self, other: &Position) -> f64 {
        haversine_distance(self.lat_deg, self.lon_deg, other.lat_deg, other.lon_deg)
    }
}

/// One track point. `time` is `None` when the file carried no timestamp.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub time: Option<DateTime<Utc>>,
    pub position: Position,
}

impl Sample {
    pub fn new(time: Option<DateTime<Utc>>, position: Position) -> Self {
        Self { time, position }
    }
}

/// Parse GPX bytes into samples in document order (tracks, then segments, then points).
pub fn parse_gpx_samples(input: &[u8]) -> Result<Vec<Sample>, OdometerError> {
    let mut cursor = Cursor::new(input);
    let gpx = gpx::read(&mut cursor).map_err(|e| OdometerError::GpxParse(e.to_string()))?;
    let mut out = Vec::new();

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let time = match point.time {
                    Some(time) => {
                        let iso = time
                            .format()
                            .map_err(|e| OdometerError::GpxParse(e.to_string()))?;
                        let utc = DateTime::parse_from_rfc3339(&iso)
                            .map_err(|e| OdometerError::GpxParse(e.to_string()))?
                            .with_timezone(&Utc);
                        Some(utc)
                    }
                    None => None,
                };
                let geo = point.point();
                out.push(Sample::new(time, Position::new(geo.y(), geo.x())));
            }
        }
    }
    Ok(out)
}

pub(crate) fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
