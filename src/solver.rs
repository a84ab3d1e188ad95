//! Levenberg–Marquardt over the 9-parameter calibration vector.
//!
//! Damped normal equations `(JᵀJ + μ·diag(JᵀJ))h = −Jᵀr` with a
//! gain-ratio accept/reject rule: μ shrinks after a good step, grows by
//! a doubling factor ν after a rejected one. The diagonal scaling keeps
//! the damping useful when the parameter curvatures differ by orders of
//! magnitude, as bias and scale columns do. The Jacobian comes from
//! central finite differences, which is plenty for a 9-parameter fit on
//! bounded data.

use log::{debug, info};
use nalgebra::DVector;

use crate::error::CalibError;
use crate::types::{ParamMatrix, ParamVector, CALIB_PARAM_DIM};

#[derive(Clone, Copy, Debug)]
pub struct LmSettings {
    /// Hard cap on iterations; exceeding it is a typed failure, never a
    /// silent loop.
    pub max_iterations: usize,
    /// Convergence tolerance on the step norm and gradient max-norm.
    pub tolerance: f64,
    /// An accepted step improving the cost by less than this fraction
    /// counts as converged. This is the stop that fires on real data,
    /// where the residuals bottom out at the sensor noise floor and the
    /// absolute tolerances are unreachable.
    pub relative_tolerance: f64,
    /// Initial damping factor μ.
    pub tau: f64,
    /// Surface per-iteration residuals at info level instead of debug.
    pub verbose: bool,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-9,
            relative_tolerance: 1e-8,
            tau: 1e-3,
            verbose: false,
        }
    }
}

/// Converged fit: final parameters plus diagnostics.
#[derive(Clone, Debug)]
pub struct FitReport {
    pub params: ParamVector,
    pub rms_residual: f64,
    pub iterations: usize,
}

/// Minimize the sum of squared residuals produced by `residual_fn`.
///
/// `residual_fn` fills a vector of `residual_dim` residuals for a given
/// parameter vector; it is called O(iterations × parameters) times for
/// the finite-difference Jacobian.
pub fn minimize<F>(
    settings: &LmSettings,
    initial: ParamVector,
    residual_dim: usize,
    mut residual_fn: F,
) -> Result<FitReport, CalibError>
where
    F: FnMut(&ParamVector, &mut DVector<f64>),
{
    let mut x = initial;
    let mut residuals = DVector::zeros(residual_dim);
    let mut new_residuals = DVector::zeros(residual_dim);

    residual_fn(&x, &mut residuals);
    let mut cost = 0.5 * residuals.norm_squared();

    let mut jacobian = numeric_jacobian(&x, residual_dim, &mut residual_fn);
    let mut normal: ParamMatrix = jacobian.transpose() * &jacobian;
    let mut gradient: ParamVector = jacobian.transpose() * &residuals;

    let mut mu = settings.tau;
    let mut nu = 2.0;

    for iteration in 0..settings.max_iterations {
        let rms = (2.0 * cost / residual_dim as f64).sqrt();
        if settings.verbose {
            info!("lm it {iteration}: rms {rms:.6e} mu {mu:.3e}");
        } else {
            debug!("lm it {iteration}: rms {rms:.6e} mu {mu:.3e}");
        }

        if gradient.amax() < settings.tolerance {
            return Ok(FitReport {
                params: x,
                rms_residual: rms,
                iterations: iteration,
            });
        }

        let scaling = ParamMatrix::from_diagonal(&normal.diagonal());
        let damped = normal + scaling * mu;
        let step = match damped.cholesky() {
            Some(chol) => chol.solve(&(-gradient)),
            None => return Err(CalibError::SingularNormalEquations { iteration }),
        };

        if step.norm() <= settings.tolerance * (x.norm() + settings.tolerance) {
            return Ok(FitReport {
                params: x,
                rms_residual: rms,
                iterations: iteration,
            });
        }

        let candidate = x + step;
        residual_fn(&candidate, &mut new_residuals);
        let new_cost = 0.5 * new_residuals.norm_squared();

        let predicted = 0.5 * step.dot(&(scaling * step * mu - gradient));
        let gain = if predicted != 0.0 {
            (cost - new_cost) / predicted
        } else {
            f64::NAN
        };

        if gain.is_finite() && gain > 0.0 {
            let improvement = cost - new_cost;
            x = candidate;
            cost = new_cost;
            residuals.copy_from(&new_residuals);

            if improvement <= settings.relative_tolerance * cost.max(f64::MIN_POSITIVE) {
                return Ok(FitReport {
                    params: x,
                    rms_residual: (2.0 * cost / residual_dim as f64).sqrt(),
                    iterations: iteration + 1,
                });
            }

            jacobian = numeric_jacobian(&x, residual_dim, &mut residual_fn);
            normal = jacobian.transpose() * &jacobian;
            gradient = jacobian.transpose() * &residuals;

            mu *= (1.0f64 / 3.0).max(1.0 - (2.0 * gain - 1.0).powi(3));
            nu = 2.0;
        } else {
            mu *= nu;
            nu *= 2.0;
            if !mu.is_finite() {
                return Err(CalibError::NoConvergence {
                    iterations: iteration,
                    residual: rms,
                });
            }
        }
    }

    Err(CalibError::NoConvergence {
        iterations: settings.max_iterations,
        residual: (2.0 * cost / residual_dim as f64).sqrt(),
    })
}

/// Central-difference Jacobian, one column per parameter.
fn numeric_jacobian<F>(
    x: &ParamVector,
    residual_dim: usize,
    residual_fn: &mut F,
) -> nalgebra::OMatrix<f64, nalgebra::Dyn, nalgebra::Const<CALIB_PARAM_DIM>>
where
    F: FnMut(&ParamVector, &mut DVector<f64>),
{
    let mut jacobian = nalgebra::OMatrix::<f64, nalgebra::Dyn, nalgebra::Const<CALIB_PARAM_DIM>>::zeros(
        residual_dim,
    );
    let mut plus = DVector::zeros(residual_dim);
    let mut minus = DVector::zeros(residual_dim);

    for j in 0..CALIB_PARAM_DIM {
        let delta = 1e-6 * x[j].abs().max(1.0);
        let mut probe = *x;
        probe[j] = x[j] + delta;
        residual_fn(&probe, &mut plus);
        probe[j] = x[j] - delta;
        residual_fn(&probe, &mut minus);

        let column = (&plus - &minus) / (2.0 * delta);
        jacobian.column_mut(j).copy_from(&column);
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_quadratic_minimum() {
        let target = ParamVector::from_column_slice(&[
            0.01, -0.02, 0.005, 0.97, 1.04, 1.01, 0.1, -0.2, 0.3,
        ]);
        let report = minimize(
            &LmSettings::default(),
            ParamVector::from_column_slice(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]),
            9,
            |p, out| {
                for i in 0..9 {
                    out[i] = p[i] - target[i];
                }
            },
        )
        .unwrap();
        assert!((report.params - target).norm() < 1e-6);
        assert!(report.rms_residual < 1e-6);
    }

    #[test]
    fn test_nonlinear_residuals_converge() {
        // Residuals couple parameters through products, like the scale ×
        // misalignment terms in the real model.
        let report = minimize(
            &LmSettings::default(),
            ParamVector::from_column_slice(&[0.1, 0.1, 0.1, 1.2, 0.8, 1.1, 0.5, 0.5, 0.5]),
            12,
            |p, out| {
                for i in 0..9 {
                    out[i] = p[i] * p[i] - 1.0;
                }
                out[9] = p[0] * p[3] - 1.0;
                out[10] = p[1] * p[4] - 1.0;
                out[11] = p[2] * p[5] - 1.0;
            },
        )
        .unwrap();
        assert!(report.rms_residual < 1e-6);
    }

    #[test]
    fn test_noise_floor_with_spread_curvatures_converges() {
        // Per-parameter curvatures spanning four orders of magnitude and
        // an irreducible residual floor, like a real fit on jittery
        // samples. The fit must report convergence well before the
        // iteration cap even though the cost never reaches zero.
        let target = ParamVector::from_column_slice(&[
            0.01, -0.02, 0.005, 0.97, 1.04, 1.01, 0.1, -0.2, 0.3,
        ]);
        let weights = [120.0, 80.0, 150.0, 1.0, 1.3, 0.9, 0.02, 0.015, 0.01];
        let report = minimize(
            &LmSettings::default(),
            ParamVector::from_column_slice(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]),
            18,
            |p, out| {
                for i in 0..9 {
                    let d = weights[i] * (p[i] - target[i]);
                    out[i] = d + 0.01 * ((i as f64) + 1.0).sin();
                    out[i + 9] = d * d - 0.01;
                }
            },
        )
        .unwrap();
        assert!(report.iterations < 100);
        assert!(report.rms_residual < 0.05);
    }

    #[test]
    fn test_iteration_cap_is_typed_failure() {
        let settings = LmSettings {
            max_iterations: 2,
            ..Default::default()
        };
        // A residual the solver cannot reduce meaningfully in 2 steps.
        let err = minimize(
            &settings,
            ParamVector::from_element(5.0),
            9,
            |p, out| {
                for i in 0..9 {
                    out[i] = (p[i] * 3.0).sin() + p[i] * p[i] - 2.0;
                }
            },
        )
        .unwrap_err();
        assert!(matches!(err, CalibError::NoConvergence { .. }));
    }
}
