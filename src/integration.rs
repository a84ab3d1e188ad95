//! Dead-reckoning of orientation change from a gyroscope stream.
//!
//! Quaternion integration of candidate-calibrated angular velocity,
//! midpoint rule on ω between consecutive samples. Used by the estimator
//! to predict the rotation between two static intervals.

use nalgebra::UnitQuaternion;

use crate::model::TriadCalibration;
use crate::types::TriadSample;

/// Integrate body rotation over `gyro[start..=end]` under `calib`.
///
/// Returns the quaternion ΔQ such that a vector fixed in the world frame
/// and expressed in the body frame transports as
/// `v_body(end) = ΔQ⁻¹ · v_body(start)`.
pub fn integrate_rotation(
    gyro: &[TriadSample],
    calib: &TriadCalibration,
    start: usize,
    end: usize,
) -> UnitQuaternion<f64> {
    let mut q = UnitQuaternion::identity();
    if end <= start {
        return q;
    }

    let mut omega_prev = calib.apply_vector(gyro[start].vector());
    for i in start..end {
        let dt = gyro[i + 1].timestamp - gyro[i].timestamp;
        let omega_next = calib.apply_vector(gyro[i + 1].vector());
        let omega_mid = 0.5 * (omega_prev + omega_next);
        q *= UnitQuaternion::from_scaled_axis(omega_mid * dt);
        omega_prev = omega_next;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_PI_2;

    const DT: f64 = 0.01;

    fn constant_rate_stream(omega: Vector3<f64>, n: usize) -> Vec<TriadSample> {
        (0..n)
            .map(|i| TriadSample::from_vector(i as f64 * DT, omega))
            .collect()
    }

    #[test]
    fn test_zero_rate_integrates_to_identity() {
        let gyro = constant_rate_stream(Vector3::zeros(), 100);
        let q = integrate_rotation(&gyro, &TriadCalibration::identity(), 0, 99);
        assert!(q.angle() < 1e-12);
    }

    #[test]
    fn test_quarter_turn_about_z() {
        // π/2 over 1 second at 100 Hz.
        let rate = FRAC_PI_2 / (99.0 * DT);
        let gyro = constant_rate_stream(Vector3::new(0.0, 0.0, rate), 100);
        let q = integrate_rotation(&gyro, &TriadCalibration::identity(), 0, 99);
        assert!((q.angle() - FRAC_PI_2).abs() < 1e-9);

        // Gravity along x transports to -y under the inverse rotation.
        let u0 = Vector3::x();
        let u1 = q.inverse() * u0;
        assert!((u1 - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_bias_is_removed_before_integration() {
        let bias = Vector3::new(0.02, -0.01, 0.03);
        let gyro = constant_rate_stream(bias, 200);
        let calib = TriadCalibration::with_bias(bias);
        let q = integrate_rotation(&gyro, &calib, 0, 199);
        assert!(q.angle() < 1e-12);
    }
}
