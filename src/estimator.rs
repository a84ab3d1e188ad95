//! Multi-position calibration of an accelerometer/gyroscope pair.
//!
//! One recording, several held-still orientations interspersed with free
//! motion. The accelerometer model is fit so every static interval's
//! corrected reading has the reference gravity magnitude; the gyroscope
//! model is fit so the rotation integrated between consecutive static
//! intervals transports the measured gravity direction from one interval
//! onto the next.

use log::info;
use nalgebra::{DVector, Vector3};

use crate::detector::{
    derive_window, detect_static_intervals, initial_interval, magnitude_variance,
};
use crate::error::CalibError;
use crate::integration::integrate_rotation;
use crate::model::TriadCalibration;
use crate::solver::{minimize, LmSettings};
use crate::types::{average_period, StaticInterval, TriadSample};

/// Detector threshold relative to the acceleration-magnitude variance of
/// the guaranteed initial still interval.
const STATIC_VARIANCE_MULTIPLIER: f64 = 6.0;

/// Maximum clock disagreement between index-aligned accelerometer and
/// gyroscope samples. Anything larger means the streams were not
/// recorded together.
const TIMESTAMP_TOLERANCE_S: f64 = 1e-6;

/// Immutable configuration for one calibration run.
#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    /// Seconds the device is guaranteed motionless at the start of the
    /// recording.
    pub init_still_duration_s: f64,
    /// Reference gravity magnitude in m/s² at the recording site.
    pub gravity_magnitude: f64,
    /// Static-detector window in samples; 0 derives a ~1 s window from
    /// the sampling rate.
    pub window_size: usize,
    /// Minimum duration of a static interval to count as evidence.
    pub min_interval_duration_s: f64,
    /// Minimum number of accepted static intervals.
    pub min_intervals: usize,
    /// One residual per interval mean instead of one per static sample.
    pub acc_use_means: bool,
    /// Seed model for the accelerometer fit (identity when absent).
    pub init_acc_calib: Option<TriadCalibration>,
    /// Seed model for the gyroscope fit (identity plus the measured
    /// initial-interval bias when absent).
    pub init_gyro_calib: Option<TriadCalibration>,
    /// Surface per-iteration solver state at info level.
    pub verbose: bool,
    pub solver: LmSettings,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            init_still_duration_s: 30.0,
            gravity_magnitude: 9.797,
            window_size: 0,
            min_interval_duration_s: 1.0,
            min_intervals: 6,
            acc_use_means: false,
            init_acc_calib: None,
            init_gyro_calib: None,
            verbose: false,
            solver: LmSettings::default(),
        }
    }
}

/// Result of a calibration run: one fitted model per sensor plus the
/// evidence and residuals behind them.
#[derive(Clone, Debug)]
pub struct ImuCalibration {
    pub acc: TriadCalibration,
    pub gyro: TriadCalibration,
    pub intervals: Vec<StaticInterval>,
    pub acc_rms_residual: f64,
    pub gyro_rms_residual: f64,
}

/// Fit accelerometer and gyroscope calibrations from one recording.
///
/// The streams must be index-aligned (same length, same timestamps);
/// every failure comes back as a typed [`CalibError`].
pub fn calibrate_imu(
    acc: &[TriadSample],
    gyro: &[TriadSample],
    config: &CalibrationConfig,
) -> Result<ImuCalibration, CalibError> {
    if acc.len() != gyro.len() {
        return Err(CalibError::StreamMismatch {
            acc: acc.len(),
            gyro: gyro.len(),
        });
    }
    for (i, (a, g)) in acc.iter().zip(gyro).enumerate() {
        if (a.timestamp - g.timestamp).abs() > TIMESTAMP_TOLERANCE_S {
            return Err(CalibError::TimestampMismatch {
                index: i,
                acc: a.timestamp,
                gyro: g.timestamp,
            });
        }
    }
    let period = average_period(acc)?;

    let init = initial_interval(acc, config.init_still_duration_s)?;
    let threshold = STATIC_VARIANCE_MULTIPLIER * magnitude_variance(acc, &init);
    let window = if config.window_size > 0 {
        config.window_size
    } else {
        derive_window(acc)?
    };
    let min_len = (config.min_interval_duration_s / period).ceil().max(1.0) as usize;

    // The initial interval is guaranteed evidence; the detector runs on
    // the remainder of the recording.
    let offset = init.end + 1;
    let mut intervals = vec![init];
    intervals.extend(
        detect_static_intervals(&acc[offset..], window, threshold, min_len)
            .into_iter()
            .map(|iv| StaticInterval::new(iv.start + offset, iv.end + offset)),
    );

    info!(
        "calibration: {} samples at {:.1} Hz, {} static intervals (threshold {:.3e})",
        acc.len(),
        1.0 / period,
        intervals.len(),
        threshold
    );

    if intervals.len() < config.min_intervals {
        return Err(CalibError::InsufficientIntervals {
            found: intervals.len(),
            required: config.min_intervals,
        });
    }

    let mut solver = config.solver;
    solver.verbose = config.verbose;

    let acc_seed = config.init_acc_calib.clone().unwrap_or_default();
    let (acc_calib, acc_rms) = fit_accelerometer(
        acc,
        &intervals,
        config.gravity_magnitude,
        config.acc_use_means,
        &acc_seed,
        &solver,
    )?;
    info!("accelerometer fit: rms residual {acc_rms:.6e}\n{acc_calib}");

    let gyro_seed = config
        .init_gyro_calib
        .clone()
        .unwrap_or_else(|| TriadCalibration::with_bias(init.mean(gyro)));
    let (gyro_calib, gyro_rms) =
        fit_gyroscope(gyro, &intervals, &acc_calib, acc, &gyro_seed, &solver)?;
    info!("gyroscope fit: rms residual {gyro_rms:.6e}\n{gyro_calib}");

    Ok(ImuCalibration {
        acc: acc_calib,
        gyro: gyro_calib,
        intervals,
        acc_rms_residual: acc_rms,
        gyro_rms_residual: gyro_rms,
    })
}

/// Accelerometer fit: the corrected reading in every static interval must
/// have magnitude `gravity`. One residual per interval mean or per static
/// sample depending on `use_means`.
fn fit_accelerometer(
    acc: &[TriadSample],
    intervals: &[StaticInterval],
    gravity: f64,
    use_means: bool,
    seed: &TriadCalibration,
    solver: &LmSettings,
) -> Result<(TriadCalibration, f64), CalibError> {
    let readings: Vec<Vector3<f64>> = if use_means {
        intervals.iter().map(|iv| iv.mean(acc)).collect()
    } else {
        intervals
            .iter()
            .flat_map(|iv| acc[iv.start..=iv.end].iter().map(|s| s.vector()))
            .collect()
    };

    let report = minimize(solver, seed.parameters(), readings.len(), |params, out| {
        let model = TriadCalibration::from_parameters(params);
        for (i, raw) in readings.iter().enumerate() {
            out[i] = model.apply_vector(*raw).norm() - gravity;
        }
    })?;

    Ok((
        TriadCalibration::from_parameters(&report.params),
        report.rms_residual,
    ))
}

/// Gyroscope fit: for every consecutive interval pair, the rotation
/// integrated across the motion between them must transport the measured
/// gravity direction of the first interval onto the second.
fn fit_gyroscope(
    gyro: &[TriadSample],
    intervals: &[StaticInterval],
    acc_calib: &TriadCalibration,
    acc: &[TriadSample],
    seed: &TriadCalibration,
    solver: &LmSettings,
) -> Result<(TriadCalibration, f64), CalibError> {
    // Gravity directions observed at rest, in the corrected accel frame.
    let gravity_dirs: Vec<Vector3<f64>> = intervals
        .iter()
        .map(|iv| acc_calib.apply_vector(iv.mean(acc)).normalize())
        .collect();

    let spans: Vec<(usize, usize)> = intervals
        .windows(2)
        .map(|pair| (pair[0].end, pair[1].start))
        .collect();

    let residual_dim = 3 * spans.len();
    let report = minimize(solver, seed.parameters(), residual_dim, |params, out| {
        let model = TriadCalibration::from_parameters(params);
        for (k, &(from, to)) in spans.iter().enumerate() {
            let dq = integrate_rotation(gyro, &model, from, to);
            let predicted = dq.inverse() * gravity_dirs[k];
            let diff: DVector<f64> = DVector::from_column_slice(
                (gravity_dirs[k + 1] - predicted).as_slice(),
            );
            out.rows_mut(3 * k, 3).copy_from(&diff);
        }
    })?;

    Ok((
        TriadCalibration::from_parameters(&report.params),
        report.rms_residual,
    ))
}
