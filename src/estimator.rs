//! Smoothed throughput estimation from raw progress samples.
//!
//! The estimator is pure computation: it consumes `(elapsed, cumulative
//! bytes)` samples for one stage and maintains an exponential moving average
//! of the instantaneous rate. The final per-stage result never comes from
//! the smoothed series; it is computed separately from total bytes over
//! total wall-clock time via [`average_mbps`].

use crate::{Error, Result};
use std::time::Duration;

/// Converts a stream of progress samples into a smoothed live speed.
///
/// Samples closer together than the minimum interval, or with
/// non-increasing byte counts, are ignored for smoothing purposes. This
/// guards against division by near-zero time deltas and duplicate or
/// reordered samples from bursty network scheduling.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    smoothing_factor: f64,
    min_sample_interval: Duration,
    last_sample: Option<(Duration, u64)>,
    smoothed_mbps: f64,
}

impl SpeedEstimator {
    /// Creates an estimator with the given smoothing factor and minimum
    /// sample spacing. The smoothed value starts at zero.
    pub fn new(smoothing_factor: f64, min_sample_interval: Duration) -> Self {
        Self {
            smoothing_factor,
            min_sample_interval,
            last_sample: None,
            smoothed_mbps: 0.0,
        }
    }

    /// Feeds one progress sample and returns the current smoothed speed.
    ///
    /// `elapsed` is the time since stage start; `cumulative_bytes` is the
    /// total transferred so far. The sample always becomes the new
    /// reference point, but only updates the smoothed value when enough
    /// time passed and bytes strictly increased.
    pub fn record(&mut self, elapsed: Duration, cumulative_bytes: u64) -> f64 {
        if let Some((last_elapsed, last_bytes)) = self.last_sample {
            let time_delta = elapsed.saturating_sub(last_elapsed).as_secs_f64();
            if time_delta > self.min_sample_interval.as_secs_f64()
                && cumulative_bytes > last_bytes
            {
                let bytes_delta = cumulative_bytes - last_bytes;
                let instant_mbps = (bytes_delta as f64 * 8.0) / time_delta / 1_000_000.0;
                self.smoothed_mbps = instant_mbps * self.smoothing_factor
                    + self.smoothed_mbps * (1.0 - self.smoothing_factor);
            }
        }
        self.last_sample = Some((elapsed, cumulative_bytes));
        self.smoothed_mbps
    }

    /// Current smoothed speed in Mbps.
    pub fn smoothed_mbps(&self) -> f64 {
        self.smoothed_mbps
    }

    /// True once at least one sample was recorded.
    pub fn has_samples(&self) -> bool {
        self.last_sample.is_some()
    }

    /// Clears the accumulator for a new stage.
    pub fn reset(&mut self) {
        self.last_sample = None;
        self.smoothed_mbps = 0.0;
    }
}

/// Final average speed for a stage: total bytes over total wall-clock time.
///
/// A zero or negative duration cannot produce a meaningful speed and is
/// reported as [`Error::DegenerateTiming`] rather than an infinite value.
pub fn average_mbps(total_bytes: u64, elapsed: Duration) -> Result<f64> {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return Err(Error::DegenerateTiming);
    }
    Ok((total_bytes as f64 * 8.0) / seconds / 1_000_000.0)
}
