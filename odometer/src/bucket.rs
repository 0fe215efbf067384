//! Dense per-bucket mileage over the collection horizon.

use std::ops::AddAssign;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::track::{Position, Sample};
use crate::{round_to_granularity, OdometerError, Params, METERS_PER_MILE};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Time span covered by a run, anchored at `now` (exclusive).
///
/// Raw buckets start at `now - (lookback + window)`; reported buckets start at
/// `now - lookback`. Every bucket key is `collect_start + offset * granularity`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Horizon {
    now: DateTime<Utc>,
    collect_start: DateTime<Utc>,
    granularity_s: i64,
    window_buckets: usize,
    lookback_buckets: usize,
}

impl Horizon {
    /// Build the horizon ending at `now`, rounded to the configured granularity.
    pub fn new(now: DateTime<Utc>, params: &Params) -> Result<Self, OdometerError> {
        params.validate()?;
        let now = round_to_granularity(now, params.granularity())?;
        let span = Duration::seconds((params.window_s + params.lookback_s) as i64);
        let collect_start = now.checked_sub_signed(span).ok_or_else(|| {
            OdometerError::InvalidParameter(format!(
                "window plus lookback reaches before the earliest representable time from {now}"
            ))
        })?;
        Ok(Self {
            now,
            collect_start,
            granularity_s: params.granularity_s as i64,
            window_buckets: (params.window_s / params.granularity_s) as usize,
            lookback_buckets: (params.lookback_s / params.granularity_s) as usize,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn granularity(&self) -> Duration {
        Duration::seconds(self.granularity_s)
    }

    pub fn window_buckets(&self) -> usize {
        self.window_buckets
    }

    pub fn lookback_buckets(&self) -> usize {
        self.lookback_buckets
    }

    pub fn bucket_count(&self) -> usize {
        self.window_buckets + self.lookback_buckets
    }

    pub fn collect_start(&self) -> DateTime<Utc> {
        self.collect_start
    }

    pub fn aggregate_start(&self) -> DateTime<Utc> {
        self.key(self.window_buckets)
    }

    /// Bucket key for an offset from the collection start.
    pub fn key(&self, offset: usize) -> DateTime<Utc> {
        self.collect_start + Duration::seconds(offset as i64 * self.granularity_s)
    }

    /// Whether a timestamp lies in `[collect_start, now)`.
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.collect_start() && time < self.now
    }

    /// Offset of the bucket `time` rounds to, or `None` when that bucket is
    /// outside the dense series.
    pub fn offset_of(&self, time: DateTime<Utc>) -> Option<usize> {
        let delta = time - self.collect_start();
        let delta_ns =
            i128::from(delta.num_seconds()) * NANOS_PER_SECOND + i128::from(delta.subsec_nanos());
        let step_ns = i128::from(self.granularity_s) * NANOS_PER_SECOND;
        let offset = (delta_ns + step_ns / 2).div_euclid(step_ns);
        if offset < 0 || offset >= self.bucket_count() as i128 {
            return None;
        }
        Some(offset as usize)
    }
}

/// Counters gathered while folding one or more tracks into a [`BucketSeries`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackStats {
    pub samples: usize,
    pub untimed: usize,
    pub out_of_horizon: usize,
    pub pairs: usize,
    /// Pairs whose later point rounds past the last bucket.
    pub dropped: usize,
    pub miles: f64,
}

impl AddAssign for TrackStats {
    fn add_assign(&mut self, other: Self) {
        self.samples += other.samples;
        self.untimed += other.untimed;
        self.out_of_horizon += other.out_of_horizon;
        self.pairs += other.pairs;
        self.dropped += other.dropped;
        self.miles += other.miles;
    }
}

/// Miles per bucket, one entry for every bucket key in the horizon.
#[derive(Clone, Debug)]
pub struct BucketSeries {
    horizon: Horizon,
    miles: Vec<f64>,
}

impl BucketSeries {
    pub fn new(horizon: Horizon) -> Self {
        let miles = vec![0.0; horizon.bucket_count()];
        Self { horizon, miles }
    }

    /// Wrap precomputed bucket values; `miles` must hold one value per bucket.
    pub fn from_values(horizon: Horizon, miles: Vec<f64>) -> Result<Self, OdometerError> {
        if miles.len() != horizon.bucket_count() {
            return Err(OdometerError::InvalidParameter(format!(
                "expected {} buckets, got {}",
                horizon.bucket_count(),
                miles.len()
            )));
        }
        Ok(Self { horizon, miles })
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn values(&self) -> &[f64] {
        &self.miles
    }

    pub fn len(&self) -> usize {
        self.miles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.miles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.miles
            .iter()
            .enumerate()
            .map(|(offset, &miles)| (self.horizon.key(offset), miles))
    }

    /// Add miles to the bucket `time` rounds to. Returns `false` if that
    /// bucket lies outside the series.
    pub fn add(&mut self, time: DateTime<Utc>, miles: f64) -> bool {
        match self.horizon.offset_of(time) {
            Some(offset) => {
                self.miles[offset] += miles;
                true
            }
            None => false,
        }
    }

    /// Fold one file's samples in, pairing each in-horizon sample with the
    /// previous one from the same file.
    pub fn accumulate_track(&mut self, samples: &[Sample]) -> TrackStats {
        self.accumulate_track_with(samples, Position::distance_m)
    }

    /// As [`accumulate_track`](Self::accumulate_track) with a custom distance
    /// function returning meters.
    pub fn accumulate_track_with<F>(&mut self, samples: &[Sample], distance_m: F) -> TrackStats
    where
        F: Fn(&Position, &Position) -> f64,
    {
        let mut stats = TrackStats::default();
        let mut last: Option<Position> = None;

        for sample in samples {
            stats.samples += 1;
            let Some(time) = sample.time else {
                stats.untimed += 1;
                continue;
            };
            if !self.horizon.contains(time) {
                stats.out_of_horizon += 1;
                continue;
            }
            let Some(previous) = last else {
                last = Some(sample.position);
                continue;
            };

            let miles = distance_m(&previous, &sample.position) / METERS_PER_MILE;
            stats.pairs += 1;
            if self.add(time, miles) {
                stats.miles += miles;
            } else {
                stats.dropped += 1;
            }
            last = Some(sample.position);
        }
        stats
    }
}
