//! The affine sensor-error model for one triad sensor.
//!
//! `corrected = S · M · (raw − b)` where `S = diag(scale)`, `M` is the
//! unit-upper-triangular misalignment matrix and `b` the bias vector.
//! Nine free parameters per sensor: three misalignment off-diagonals,
//! three scale factors, three bias components.

use std::fmt;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};

use crate::error::CalibError;
use crate::types::{ParamVector, TriadSample};

/// Fitted (or identity) calibration for a single 3-axis sensor.
///
/// Immutable once produced by the estimator; `apply` is deterministic and
/// side-effect free so it can be used sample-by-sample on a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct TriadCalibration {
    bias: Vector3<f64>,
    scale: Vector3<f64>,
    misalignment: Matrix3<f64>,
}

impl Default for TriadCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

impl TriadCalibration {
    /// Identity model: zero bias, unit scale, no cross-axis coupling.
    pub fn identity() -> Self {
        Self {
            bias: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            misalignment: Matrix3::identity(),
        }
    }

    /// Build a model from explicit components. The misalignment diagonal
    /// is forced to 1 and the lower triangle to 0 (reduced 9-parameter
    /// form).
    pub fn new(bias: Vector3<f64>, scale: Vector3<f64>, mis_xy: f64, mis_xz: f64, mis_yz: f64) -> Self {
        Self {
            bias,
            scale,
            misalignment: Matrix3::new(
                1.0, mis_xy, mis_xz, //
                0.0, 1.0, mis_yz, //
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// Identity misalignment/scale with the given bias. Used to seed the
    /// gyroscope fit from the initial still interval.
    pub fn with_bias(bias: Vector3<f64>) -> Self {
        Self {
            bias,
            ..Self::identity()
        }
    }

    pub fn bias(&self) -> Vector3<f64> {
        self.bias
    }

    pub fn scale(&self) -> Vector3<f64> {
        self.scale
    }

    pub fn misalignment(&self) -> Matrix3<f64> {
        self.misalignment
    }

    /// Pack into the solver's parameter vector:
    /// `[m_xy, m_xz, m_yz, s_x, s_y, s_z, b_x, b_y, b_z]`.
    pub fn parameters(&self) -> ParamVector {
        ParamVector::from_column_slice(&[
            self.misalignment[(0, 1)],
            self.misalignment[(0, 2)],
            self.misalignment[(1, 2)],
            self.scale.x,
            self.scale.y,
            self.scale.z,
            self.bias.x,
            self.bias.y,
            self.bias.z,
        ])
    }

    /// Inverse of [`parameters`](Self::parameters).
    pub fn from_parameters(p: &ParamVector) -> Self {
        Self::new(
            Vector3::new(p[6], p[7], p[8]),
            Vector3::new(p[3], p[4], p[5]),
            p[0],
            p[1],
            p[2],
        )
    }

    /// The combined correction matrix `S · M`.
    pub fn correction_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_diagonal(&self.scale) * self.misalignment
    }

    /// Forward map: raw sensor units → physical, bias-free, axis-aligned.
    pub fn apply_vector(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self.correction_matrix() * (raw - self.bias)
    }

    /// Forward map on a sample; the timestamp is untouched.
    pub fn apply(&self, sample: &TriadSample) -> TriadSample {
        TriadSample::from_vector(sample.timestamp, self.apply_vector(sample.vector()))
    }

    /// Algebraic inverse of the forward map: physical units back to raw.
    ///
    /// Valid whenever the scale components are nonzero; the unit-diagonal
    /// triangular misalignment is always invertible.
    pub fn inverse_apply_vector(&self, corrected: Vector3<f64>) -> Vector3<f64> {
        let unscaled = corrected.component_div(&self.scale);
        // Closed-form inverse of [[1,a,b],[0,1,c],[0,0,1]].
        let a = self.misalignment[(0, 1)];
        let b = self.misalignment[(0, 2)];
        let c = self.misalignment[(1, 2)];
        let unmixed = Vector3::new(
            unscaled.x - a * unscaled.y + (a * c - b) * unscaled.z,
            unscaled.y - c * unscaled.z,
            unscaled.z,
        );
        unmixed + self.bias
    }

    /// Serialize to the fixed-order textual artifact: bias, scale, then
    /// the full misalignment matrix, one labelled section each.
    /// Unpadded `{:e}` keeps every component bit-exact through a
    /// save/load cycle.
    pub fn save(&self, path: &Path) -> Result<(), CalibError> {
        let mut out = String::new();
        out.push_str(&format!(
            "bias {:e} {:e} {:e}\n",
            self.bias.x, self.bias.y, self.bias.z
        ));
        out.push_str(&format!(
            "scale {:e} {:e} {:e}\n",
            self.scale.x, self.scale.y, self.scale.z
        ));
        out.push_str("misalignment\n");
        for r in 0..3 {
            out.push_str(&format!(
                "{:e} {:e} {:e}\n",
                self.misalignment[(r, 0)],
                self.misalignment[(r, 1)],
                self.misalignment[(r, 2)]
            ));
        }
        std::fs::write(path, out).map_err(|e| CalibError::ArtifactIo(e.to_string()))
    }

    /// Load a previously saved artifact. Malformed or incomplete files
    /// are rejected; there is no silent identity fallback.
    pub fn load(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path).map_err(|e| CalibError::ArtifactIo(e.to_string()))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, CalibError> {
        let mut tokens = text.split_whitespace();

        expect_label(&mut tokens, "bias")?;
        let bias = parse_vec3(&mut tokens, "bias")?;
        expect_label(&mut tokens, "scale")?;
        let scale = parse_vec3(&mut tokens, "scale")?;
        expect_label(&mut tokens, "misalignment")?;
        let mut mis = Matrix3::zeros();
        for r in 0..3 {
            let row = parse_vec3(&mut tokens, "misalignment")?;
            mis.set_row(r, &row.transpose());
        }
        if let Some(extra) = tokens.next() {
            return Err(CalibError::MalformedArtifact(format!(
                "trailing data '{extra}'"
            )));
        }

        if scale.iter().any(|&s| !(s > 0.0)) {
            return Err(CalibError::MalformedArtifact(format!(
                "scale components must be positive, got [{} {} {}]",
                scale.x, scale.y, scale.z
            )));
        }
        for i in 0..3 {
            if (mis[(i, i)] - 1.0).abs() > 1e-9 {
                return Err(CalibError::MalformedArtifact(
                    "misalignment diagonal must be 1".into(),
                ));
            }
        }

        Ok(Self {
            bias,
            scale,
            misalignment: mis,
        })
    }
}

fn expect_label<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    label: &str,
) -> Result<(), CalibError> {
    match tokens.next() {
        Some(t) if t == label => Ok(()),
        Some(t) => Err(CalibError::MalformedArtifact(format!(
            "expected '{label}', found '{t}'"
        ))),
        None => Err(CalibError::MalformedArtifact(format!(
            "missing '{label}' section"
        ))),
    }
}

fn parse_vec3<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    section: &str,
) -> Result<Vector3<f64>, CalibError> {
    let mut v = [0.0; 3];
    for slot in v.iter_mut() {
        let tok = tokens.next().ok_or_else(|| {
            CalibError::MalformedArtifact(format!("truncated '{section}' section"))
        })?;
        *slot = tok.parse::<f64>().map_err(|_| {
            CalibError::MalformedArtifact(format!("bad number '{tok}' in '{section}'"))
        })?;
    }
    Ok(Vector3::new(v[0], v[1], v[2]))
}

impl fmt::Display for TriadCalibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "bias  [{:+.6} {:+.6} {:+.6}]",
            self.bias.x, self.bias.y, self.bias.z
        )?;
        writeln!(
            f,
            "scale [{:+.6} {:+.6} {:+.6}]",
            self.scale.x, self.scale.y, self.scale.z
        )?;
        write!(
            f,
            "mis   [{:+.6} {:+.6}] [{:+.6}]",
            self.misalignment[(0, 1)],
            self.misalignment[(0, 2)],
            self.misalignment[(1, 2)]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_model() -> TriadCalibration {
        TriadCalibration::new(
            Vector3::new(0.05, -0.12, 0.33),
            Vector3::new(0.98, 1.03, 1.01),
            0.002,
            -0.004,
            0.001,
        )
    }

    #[test]
    fn test_identity_is_noop() {
        let m = TriadCalibration::identity();
        let s = TriadSample::new(1.5, 0.3, -2.1, 9.7);
        let c = m.apply(&s);
        assert_eq!(c.timestamp, s.timestamp);
        assert_relative_eq!(c.x, s.x, epsilon = 1e-15);
        assert_relative_eq!(c.y, s.y, epsilon = 1e-15);
        assert_relative_eq!(c.z, s.z, epsilon = 1e-15);
    }

    #[test]
    fn test_parameter_round_trip() {
        let m = sample_model();
        let back = TriadCalibration::from_parameters(&m.parameters());
        assert_eq!(m, back);
    }

    #[test]
    fn test_inverse_recovers_raw() {
        let m = sample_model();
        let raw = Vector3::new(1.2, -0.7, 9.9);
        let corrected = m.apply_vector(raw);
        let recovered = m.inverse_apply_vector(corrected);
        assert_relative_eq!(recovered, raw, epsilon = 1e-12);
    }

    #[test]
    fn test_apply_subtracts_bias_before_mixing() {
        // With unit scale and identity misalignment the map is raw - bias.
        let m = TriadCalibration::with_bias(Vector3::new(0.1, 0.2, 0.3));
        let out = m.apply_vector(Vector3::new(1.1, 1.2, 1.3));
        assert!((out - Vector3::new(1.0, 1.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn test_artifact_round_trip() {
        let m = sample_model();
        let path = std::env::temp_dir().join("imu_calib_test_artifact.calib");
        m.save(&path).unwrap();
        let loaded = TriadCalibration::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        // Bit-exact: the artifact format must not lose precision.
        assert_eq!(loaded, m);
    }

    #[test]
    fn test_load_rejects_truncated_artifact() {
        let path = std::env::temp_dir().join("imu_calib_test_truncated.calib");
        std::fs::write(&path, "bias 0.0 0.0").unwrap();
        let err = TriadCalibration::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CalibError::MalformedArtifact(_)));
    }

    #[test]
    fn test_load_rejects_nonpositive_scale() {
        let path = std::env::temp_dir().join("imu_calib_test_badscale.calib");
        let text = "bias 0 0 0\nscale 1.0 -1.0 1.0\nmisalignment\n1 0 0\n0 1 0\n0 0 1\n";
        std::fs::write(&path, text).unwrap();
        let err = TriadCalibration::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CalibError::MalformedArtifact(_)));
    }
}
