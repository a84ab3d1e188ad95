//! Static interval detection.
//!
//! A sample is judged motionless when the moving-window variance of the
//! 3-axis magnitude stays below a threshold; maximal runs of motionless
//! samples of sufficient length become [`StaticInterval`]s.

use log::debug;

use crate::error::CalibError;
use crate::types::{average_period, StaticInterval, TriadSample};

/// Lazy, finite sequence of static intervals, ordered by start index and
/// non-overlapping by construction.
pub struct StaticIntervals {
    is_static: Vec<bool>,
    min_len: usize,
    cursor: usize,
}

impl StaticIntervals {
    /// `window` is the moving-variance window in samples (use
    /// [`derive_window`] when the caller has no better value),
    /// `threshold` the variance bound, `min_len` the minimum run length
    /// for an interval to count as evidence.
    pub fn new(samples: &[TriadSample], window: usize, threshold: f64, min_len: usize) -> Self {
        Self {
            is_static: classify(samples, window, threshold),
            min_len: min_len.max(1),
            cursor: 0,
        }
    }
}

impl Iterator for StaticIntervals {
    type Item = StaticInterval;

    fn next(&mut self) -> Option<StaticInterval> {
        let n = self.is_static.len();
        while self.cursor < n {
            // Skip to the next static run.
            while self.cursor < n && !self.is_static[self.cursor] {
                self.cursor += 1;
            }
            if self.cursor >= n {
                return None;
            }
            let start = self.cursor;
            while self.cursor < n && self.is_static[self.cursor] {
                self.cursor += 1;
            }
            let end = self.cursor - 1;
            if end - start + 1 >= self.min_len {
                return Some(StaticInterval::new(start, end));
            }
            // Run too short, keep scanning.
        }
        None
    }
}

/// Collect all static intervals of a stream.
///
/// Zero intervals is a valid result (input-quality problem, not an
/// error); the estimator decides what to do about it.
pub fn detect_static_intervals(
    samples: &[TriadSample],
    window: usize,
    threshold: f64,
    min_len: usize,
) -> Vec<StaticInterval> {
    let intervals: Vec<StaticInterval> =
        StaticIntervals::new(samples, window, threshold, min_len).collect();
    debug!(
        "static detector: window={} threshold={:.3e} min_len={} -> {} intervals",
        window,
        threshold,
        min_len,
        intervals.len()
    );
    intervals
}

/// Window size spanning roughly one second of the stream, derived from
/// its average sampling period. Always odd so the window centers on a
/// sample.
pub fn derive_window(samples: &[TriadSample]) -> Result<usize, CalibError> {
    let period = average_period(samples)?;
    let w = (1.0 / period).round().max(3.0) as usize;
    Ok(if w % 2 == 0 { w + 1 } else { w })
}

/// The guaranteed static interval covering the first `duration_s` seconds
/// of the recording (the device is assumed motionless at power-on).
pub fn initial_interval(
    samples: &[TriadSample],
    duration_s: f64,
) -> Result<StaticInterval, CalibError> {
    if samples.len() < 2 {
        return Err(CalibError::StreamTooShort { len: samples.len() });
    }
    let t0 = samples[0].timestamp;
    let mut end = 0;
    while end + 1 < samples.len() && samples[end + 1].timestamp - t0 < duration_s {
        end += 1;
    }
    Ok(StaticInterval::new(0, end))
}

/// Population variance of the 3-axis magnitude over an interval. Used to
/// derive the detector threshold from the initial still interval.
pub fn magnitude_variance(samples: &[TriadSample], interval: &StaticInterval) -> f64 {
    let slice = &samples[interval.start..=interval.end];
    let n = slice.len() as f64;
    let mean = slice.iter().map(|s| s.magnitude()).sum::<f64>() / n;
    slice
        .iter()
        .map(|s| {
            let d = s.magnitude() - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Per-sample static flags from a centered moving-window variance of the
/// magnitude signal. Samples whose window would run off either end of the
/// stream are never static.
fn classify(samples: &[TriadSample], window: usize, threshold: f64) -> Vec<bool> {
    let n = samples.len();
    let window = window.max(3);
    let half = window / 2;
    let mut flags = vec![false; n];
    if n < window {
        return flags;
    }

    let mags: Vec<f64> = samples.iter().map(|s| s.magnitude()).collect();

    // Rolling sums keep the scan O(n).
    let mut sum: f64 = mags[..window].iter().sum();
    let mut sum_sq: f64 = mags[..window].iter().map(|m| m * m).sum();
    let inv_n = 1.0 / window as f64;

    let mut lead = window; // one past the window's right edge
    loop {
        let center = lead - 1 - half;
        let mean = sum * inv_n;
        let variance = (sum_sq * inv_n - mean * mean).max(0.0);
        flags[center] = variance < threshold;

        if lead >= n {
            break;
        }
        sum += mags[lead] - mags[lead - window];
        sum_sq += mags[lead] * mags[lead] - mags[lead - window] * mags[lead - window];
        lead += 1;
    }

    flags
}
