pub mod linalg;

pub use linalg::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::CalibError;

/// One reading of a 3-axis sensor (accelerometer or gyroscope) at a point
/// in time. Timestamps are seconds; units are whatever the raw sensor
/// emits until a calibration has been applied.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TriadSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl TriadSample {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    pub fn from_vector(timestamp: f64, v: Vector3<f64>) -> Self {
        Self::new(timestamp, v.x, v.y, v.z)
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// Euclidean norm of the triad reading.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Maximal contiguous run of samples judged motionless. Indices are
/// inclusive on both ends and refer to the stream the interval was
/// detected in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInterval {
    pub start: usize,
    pub end: usize,
}

impl StaticInterval {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false // always holds at least one sample by construction
    }

    /// Mean reading over the interval.
    pub fn mean(&self, samples: &[TriadSample]) -> Vector3<f64> {
        let mut sum = Vector3::zeros();
        for s in &samples[self.start..=self.end] {
            sum += s.vector();
        }
        sum / self.len() as f64
    }
}

/// Average sampling period of a stream in seconds.
///
/// Fails on streams too short to define a period (fewer than 2
/// samples).
pub fn average_period(samples: &[TriadSample]) -> Result<f64, CalibError> {
    if samples.len() < 2 {
        return Err(CalibError::StreamTooShort { len: samples.len() });
    }
    let span = samples[samples.len() - 1].timestamp - samples[0].timestamp;
    Ok(span / (samples.len() - 1) as f64)
}
