//! Apply a fitted calibration to raw sample streams and full records.
//!
//! Pure and stateless: every sample goes through the model's forward map
//! independently, so correction is streaming-safe.

use crate::io::ImuRecord;
use crate::model::TriadCalibration;
use crate::types::TriadSample;

/// Correct a whole stream; timestamps are preserved.
pub fn correct_stream(samples: &[TriadSample], calib: &TriadCalibration) -> Vec<TriadSample> {
    samples.iter().map(|s| calib.apply(s)).collect()
}

/// Correct the accelerometer and gyroscope columns of full records.
///
/// Velocity, position and orientation columns are navigation pass-through
/// and are never touched by calibration.
pub fn correct_records(
    records: &[ImuRecord],
    acc_calib: &TriadCalibration,
    gyro_calib: &TriadCalibration,
) -> Vec<ImuRecord> {
    records
        .iter()
        .map(|r| {
            let mut out = r.clone();
            let acc = acc_calib.apply_vector(r.acc());
            let gyro = gyro_calib.apply_vector(r.gyro());
            out.acc_x = acc.x;
            out.acc_y = acc.y;
            out.acc_z = acc.z;
            out.gyro_x = gyro.x;
            out.gyro_y = gyro.y;
            out.gyro_z = gyro.z;
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_identity_correction_is_noop() {
        let samples: Vec<TriadSample> = (0..50)
            .map(|i| TriadSample::new(i as f64 * 0.01, 0.3, -0.2, 9.8))
            .collect();
        let corrected = correct_stream(&samples, &TriadCalibration::identity());
        assert_eq!(corrected.len(), samples.len());
        for (a, b) in samples.iter().zip(&corrected) {
            assert_eq!(a.timestamp, b.timestamp);
            assert!((a.vector() - b.vector()).norm() < 1e-15);
        }
    }

    #[test]
    fn test_nav_columns_pass_through() {
        let record = ImuRecord {
            sec: 12,
            nsec: 500_000_000,
            acc_x: 1.0,
            acc_y: 2.0,
            acc_z: 9.0,
            gyro_x: 0.1,
            gyro_y: 0.2,
            gyro_z: 0.3,
            vel_x: 4.0,
            vel_y: 5.0,
            vel_z: 6.0,
            pos_x: 7.0,
            pos_y: 8.0,
            pos_z: 9.0,
            quat_w: 1.0,
            quat_x: 0.0,
            quat_y: 0.0,
            quat_z: 0.0,
        };
        let calib = TriadCalibration::with_bias(Vector3::new(1.0, 2.0, 0.0));
        let out = correct_records(&[record], &calib, &TriadCalibration::identity());
        assert_eq!(out.len(), 1);
        let r = &out[0];
        // Sensor columns corrected...
        assert!((r.acc_x - 0.0).abs() < 1e-15);
        assert!((r.acc_y - 0.0).abs() < 1e-15);
        assert!((r.acc_z - 9.0).abs() < 1e-15);
        // ...navigation columns untouched.
        assert_eq!(r.sec, 12);
        assert_eq!(r.nsec, 500_000_000);
        assert_eq!(r.vel_x, 4.0);
        assert_eq!(r.pos_z, 9.0);
        assert_eq!(r.quat_w, 1.0);
    }
}
