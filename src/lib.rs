//! Multi-position calibration for low-cost IMUs.
//!
//! Fits the affine sensor-error model (bias, per-axis scale, cross-axis
//! misalignment) for an accelerometer/gyroscope pair from a single
//! recording that visits several held-still orientations, then applies
//! the fitted models to correct raw streams. The accelerometer fit uses
//! the local gravity magnitude as ground truth; the gyroscope fit checks
//! dead-reckoned rotation between static intervals against the gravity
//! directions observed at rest.
//!
//! The pipeline is a synchronous batch computation:
//! detect static intervals → fit accel model → fit gyro model → correct.

pub mod corrector;
pub mod detector;
pub mod error;
pub mod estimator;
pub mod integration;
pub mod io;
pub mod model;
pub mod solver;
pub mod types;

pub use corrector::{correct_records, correct_stream};
pub use error::CalibError;
pub use estimator::{calibrate_imu, CalibrationConfig, ImuCalibration};
pub use model::TriadCalibration;
pub use types::{StaticInterval, TriadSample};
