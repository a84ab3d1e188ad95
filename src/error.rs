use thiserror::Error;

/// Calibration error taxonomy.
///
/// Every failure is fatal for the run that produced it; calibration is
/// deterministic so nothing here is retried internally.
#[derive(Error, Debug, Clone)]
pub enum CalibError {
    #[error("accelerometer and gyroscope streams differ in length ({acc} vs {gyro})")]
    StreamMismatch { acc: usize, gyro: usize },

    #[error("accelerometer and gyroscope timestamps diverge at sample {index} ({acc} vs {gyro})")]
    TimestampMismatch { index: usize, acc: f64, gyro: f64 },

    #[error("stream has {len} samples, need at least 2 to define a sampling period")]
    StreamTooShort { len: usize },

    #[error("found {found} static intervals, need at least {required}")]
    InsufficientIntervals { found: usize, required: usize },

    #[error("normal equations are singular at iteration {iteration}")]
    SingularNormalEquations { iteration: usize },

    #[error("no convergence after {iterations} iterations (rms residual {residual:.6})")]
    NoConvergence { iterations: usize, residual: f64 },

    #[error("malformed calibration artifact: {0}")]
    MalformedArtifact(String),

    #[error("calibration artifact I/O: {0}")]
    ArtifactIo(String),
}

pub type Result<T> = std::result::Result<T, CalibError>;
