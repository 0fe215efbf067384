//! Trailing-window sums over a dense bucket series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::BucketSeries;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MileagePoint {
    pub time: DateTime<Utc>,
    /// Miles over `(time - window, time]`.
    pub miles: f64,
}

/// Running trailing-window sum, one point per bucket in `[now - lookback, now)`.
///
/// Each bucket is added once and subtracted once as it leaves the window, so
/// the pass is linear in the number of buckets regardless of window width.
/// The first `window / granularity` buckets only warm the sum up.
pub fn aggregate_mileage(buckets: &BucketSeries) -> Vec<MileagePoint> {
    let horizon = buckets.horizon();
    let warmup = horizon.window_buckets();
    let values = buckets.values();

    let mut count = 0.0;
    let mut out = Vec::with_capacity(horizon.lookback_buckets());
    for (offset, &miles) in values.iter().enumerate() {
        count += miles;
        if offset >= warmup {
            count -= values[offset - warmup];
            out.push(MileagePoint {
                time: horizon.key(offset),
                miles: count,
            });
        }
    }
    out
}
