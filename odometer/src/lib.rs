//! Rolling-window mileage computed from timestamped GPX track samples.
//!
//! Samples are folded into a dense series of fixed-width time buckets, then a
//! trailing-window sum is derived from that series with an incremental
//! add/subtract pass.

pub mod bucket;
pub mod track;
pub mod window;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bucket::{BucketSeries, Horizon, TrackStats};
pub use track::{parse_gpx_samples, Position, Sample};
pub use window::{aggregate_mileage, MileagePoint};

pub const METERS_PER_MILE: f64 = 1609.34;

const SECONDS_PER_DAY: u64 = 86_400;

/// Upper bound on the dense bucket series length.
pub const MAX_BUCKETS: usize = 10_000_000;

#[derive(Error, Debug)]
pub enum OdometerError {
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid duration '{0}': expected a number with an optional s/m/h/d/w suffix")]
    InvalidDuration(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Params {
    /// Width of one bucket.
    pub granularity_s: u64,
    /// Trailing interval summed for each reported bucket.
    pub window_s: u64,
    /// How far back from `now` the reported series extends.
    pub lookback_s: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            granularity_s: SECONDS_PER_DAY,
            window_s: 30 * SECONDS_PER_DAY,
            lookback_s: 365 * SECONDS_PER_DAY,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), OdometerError> {
        if self.granularity_s == 0 {
            return Err(OdometerError::InvalidParameter(
                "granularity must be positive".into(),
            ));
        }
        if self.window_s == 0 || self.lookback_s == 0 {
            return Err(OdometerError::InvalidParameter(
                "window and lookback must be positive".into(),
            ));
        }
        if self.window_s % self.granularity_s != 0 {
            return Err(OdometerError::InvalidParameter(format!(
                "window ({}s) must be a multiple of the granularity ({}s)",
                self.window_s, self.granularity_s
            )));
        }
        if self.lookback_s % self.granularity_s != 0 {
            return Err(OdometerError::InvalidParameter(format!(
                "lookback ({}s) must be a multiple of the granularity ({}s)",
                self.lookback_s, self.granularity_s
            )));
        }
        let horizon = self.window_s.checked_add(self.lookback_s);
        if horizon.map_or(true, |h| h > i64::MAX as u64 / 1_000) {
            return Err(OdometerError::InvalidParameter(
                "window plus lookback is out of range".into(),
            ));
        }
        if self.bucket_count() > MAX_BUCKETS {
            return Err(OdometerError::InvalidParameter(format!(
                "{} buckets exceeds the limit of {MAX_BUCKETS}; use a coarser granularity",
                self.bucket_count()
            )));
        }
        Ok(())
    }

    pub fn granularity(&self) -> Duration {
        Duration::seconds(self.granularity_s as i64)
    }

    /// Number of raw buckets retained, `⌈(lookback + window) / granularity⌉`.
    pub fn bucket_count(&self) -> usize {
        (self.lookback_s + self.window_s).div_ceil(self.granularity_s) as usize
    }
}

/// Parse a duration token such as `90`, `45m`, `1.5h`, `30d` or `2w` into seconds.
pub fn parse_duration_token(token: &str) -> Result<u64, OdometerError> {
    let trimmed = token.trim();
    let invalid = || OdometerError::InvalidDuration(token.to_string());
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" => 1.0,
        "m" | "min" => 60.0,
        "h" | "hr" => 3_600.0,
        "d" | "day" | "days" => SECONDS_PER_DAY as f64,
        "w" | "wk" => 7.0 * SECONDS_PER_DAY as f64,
        _ => return Err(invalid()),
    };
    let seconds = value * scale;
    if !seconds.is_finite() || seconds < 0.0 || seconds.fract().abs() > 1e-9 {
        return Err(invalid());
    }
    Ok(seconds.round() as u64)
}

/// Round an instant to the nearest multiple of `granularity` since the Unix
/// epoch; halfway values round up.
pub fn round_to_granularity(
    time: DateTime<Utc>,
    granularity: Duration,
) -> Result<DateTime<Utc>, OdometerError> {
    time.duration_round(granularity)
        .map_err(|e| OdometerError::InvalidParameter(format!("cannot round {time}: {e}")))
}

/// Reference instant used when none is given: one bucket past the wall clock,
/// rounded, so the bucket containing the wall clock is reported.
pub fn default_now(
    wall_clock: DateTime<Utc>,
    params: &Params,
) -> Result<DateTime<Utc>, OdometerError> {
    let ahead = wall_clock
        .checked_add_signed(params.granularity())
        .ok_or_else(|| {
            OdometerError::InvalidParameter(format!(
                "granularity reaches past the latest representable time from {wall_clock}"
            ))
        })?;
    round_to_granularity(ahead, params.granularity())
}

#[derive(Clone, Debug)]
pub struct MileageSeries {
    pub horizon: Horizon,
    pub points: Vec<MileagePoint>,
    pub stats: TrackStats,
}

/// Fold per-file sample tracks into buckets and derive the trailing-window series.
///
/// Each track is scanned with fresh pairing state, so no distance is ever
/// recorded between the end of one track and the start of the next.
pub fn compute_mileage<T>(horizon: Horizon, tracks: &[T]) -> MileageSeries
where
    T: AsRef<[Sample]>,
{
    let mut buckets = BucketSeries::new(horizon.clone());
    let mut stats = TrackStats::default();
    for track in tracks {
        stats += buckets.accumulate_track(track.as_ref());
    }
    let points = aggregate_mileage(&buckets);
    MileageSeries {
        horizon,
        points,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_duration_token() {
        assert_eq!(parse_duration_token("90").unwrap(), 90);
        assert_eq!(parse_duration_token("45m").unwrap(), 2_700);
        assert_eq!(parse_duration_token("1.5h").unwrap(), 5_400);
        assert_eq!(parse_duration_token("30d").unwrap(), 30 * 86_400);
        assert_eq!(parse_duration_token(" 2w ").unwrap(), 14 * 86_400);
        assert!(parse_duration_token("").is_err());
        assert!(parse_duration_token("d").is_err());
        assert!(parse_duration_token("3 fortnights").is_err());
        assert!(parse_duration_token("-1d").is_err());
        assert!(parse_duration_token("0.5s").is_err());
    }

    #[test]
    fn test_params_validation() {
        assert!(Params::default().validate().is_ok());
        assert_eq!(Params::default().bucket_count(), 395);

        let zero = Params {
            granularity_s: 0,
            ..Params::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(OdometerError::InvalidParameter(_))
        ));

        let ragged = Params {
            granularity_s: 86_400,
            window_s: 86_400 + 3_600,
            lookback_s: 86_400,
        };
        assert!(ragged.validate().is_err());

        let hourly = Params {
            granularity_s: 3_600,
            window_s: 86_400,
            lookback_s: 7 * 86_400,
        };
        assert!(hourly.validate().is_ok());
        assert_eq!(hourly.bucket_count(), 8 * 24);

        let per_second = Params {
            granularity_s: 1,
            window_s: 30 * 86_400,
            lookback_s: 10 * 365 * 86_400,
        };
        assert!(per_second.bucket_count() > MAX_BUCKETS);
        assert!(matches!(
            per_second.validate(),
            Err(OdometerError::InvalidParameter(_))
        ));

        let overflow = Params {
            granularity_s: 1,
            window_s: u64::MAX,
            lookback_s: 1,
        };
        assert!(overflow.validate().is_err());
    }

    #[test]
    fn test_default_now_includes_current_bucket() {
        let params = Params::default();
        let wall = Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap();
        let now = default_now(wall, &params).unwrap();
        assert_eq!(now, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());

        let evening = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let now = default_now(evening, &params).unwrap();
        assert_eq!(now, Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap());

        let vast = Params {
            granularity_s: 4_000_000_000_000_000,
            window_s: 4_000_000_000_000_000,
            lookback_s: 4_000_000_000_000_000,
        };
        assert!(vast.validate().is_ok());
        assert!(matches!(
            default_now(wall, &vast),
            Err(OdometerError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_round_to_granularity_ties_round_up() {
        let noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let rounded = round_to_granularity(noon, Duration::days(1)).unwrap();
        assert_eq!(rounded, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());

        let morning = Utc.with_ymd_and_hms(2024, 1, 1, 11, 59, 59).unwrap();
        let rounded = round_to_granularity(morning, Duration::days(1)).unwrap();
        assert_eq!(rounded, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_compute_mileage_from_gpx() {
        let gpx = br#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="odometer-tests" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="0.0" lon="0.0"><time>2024-01-04T08:00:00Z</time></trkpt>
    <trkpt lat="0.0" lon="0.01"><time>2024-01-04T09:00:00Z</time></trkpt>
    <trkpt lat="0.0" lon="0.02"><time>2024-01-04T10:00:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let samples = parse_gpx_samples(gpx).unwrap();
        let params = Params {
            granularity_s: 86_400,
            window_s: 2 * 86_400,
            lookback_s: 3 * 86_400,
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
        let horizon = Horizon::new(now, &params).unwrap();
        let series = compute_mileage(horizon, &[samples]);

        let expected = 2.0 * track::haversine_distance(0.0, 0.0, 0.0, 0.01) / METERS_PER_MILE;
        let values: Vec<f64> = series.points.iter().map(|p| p.miles).collect();
        assert_eq!(values.len(), 3);
        // 08:00..10:00 on Jan 4 rounds to the Jan 4 bucket.
        assert!(values[0].abs() < 1e-12);
        assert!((values[1] - expected).abs() < 1e-9);
        assert!((values[2] - expected).abs() < 1e-9);
        assert_eq!(series.stats.pairs, 2);
    }
}
