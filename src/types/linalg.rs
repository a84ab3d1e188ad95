//! Fixed-size linear algebra aliases for the calibration fit.
//!
//! Keeps the solver and estimator dimension-checked at compile time.

use nalgebra::{SMatrix, SVector};

/// Free parameters per sensor: 3 misalignment off-diagonals, 3 scale
/// factors, 3 bias components.
pub const CALIB_PARAM_DIM: usize = 9;

pub type ParamVector = SVector<f64, CALIB_PARAM_DIM>;
pub type ParamMatrix = SMatrix<f64, CALIB_PARAM_DIM, CALIB_PARAM_DIM>;
