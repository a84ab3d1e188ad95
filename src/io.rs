//! `.imu` recording files.
//!
//! Whitespace-separated columns per record:
//! `sec nsec acc_xyz gyro_xyz vel_xyz pos_xyz quat_wxyz`.
//! Sample timestamp is `sec + nsec/1e9`. Calibration consumes only the
//! acc/gyro columns; the rest ride along unmodified.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::types::TriadSample;

/// One line of an `.imu` file, all 18 columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ImuRecord {
    pub sec: i64,
    pub nsec: i64,
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub quat_w: f64,
    pub quat_x: f64,
    pub quat_y: f64,
    pub quat_z: f64,
}

impl ImuRecord {
    pub fn timestamp(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 / 1e9
    }

    pub fn acc(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.acc_x, self.acc_y, self.acc_z)
    }

    pub fn gyro(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.gyro_x, self.gyro_y, self.gyro_z)
    }

    pub fn acc_sample(&self) -> TriadSample {
        TriadSample::new(self.timestamp(), self.acc_x, self.acc_y, self.acc_z)
    }

    pub fn gyro_sample(&self) -> TriadSample {
        TriadSample::new(self.timestamp(), self.gyro_x, self.gyro_y, self.gyro_z)
    }

    fn parse(line: &str) -> Result<Self> {
        let mut f = line.split_whitespace();
        // sec/nsec are integer columns; a fractional value there means a
        // malformed file, not something to truncate.
        let record = ImuRecord {
            sec: parse_column(&mut f, "sec")?,
            nsec: parse_column(&mut f, "nsec")?,
            acc_x: parse_column(&mut f, "acc_x")?,
            acc_y: parse_column(&mut f, "acc_y")?,
            acc_z: parse_column(&mut f, "acc_z")?,
            gyro_x: parse_column(&mut f, "gyro_x")?,
            gyro_y: parse_column(&mut f, "gyro_y")?,
            gyro_z: parse_column(&mut f, "gyro_z")?,
            vel_x: parse_column(&mut f, "vel_x")?,
            vel_y: parse_column(&mut f, "vel_y")?,
            vel_z: parse_column(&mut f, "vel_z")?,
            pos_x: parse_column(&mut f, "pos_x")?,
            pos_y: parse_column(&mut f, "pos_y")?,
            pos_z: parse_column(&mut f, "pos_z")?,
            quat_w: parse_column(&mut f, "quat_w")?,
            quat_x: parse_column(&mut f, "quat_x")?,
            quat_y: parse_column(&mut f, "quat_y")?,
            quat_z: parse_column(&mut f, "quat_z")?,
        };
        if let Some(extra) = f.next() {
            bail!("trailing column '{extra}'");
        }
        Ok(record)
    }
}

fn parse_column<'a, T>(fields: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fields
        .next()
        .with_context(|| format!("missing column '{name}'"))?
        .parse()
        .with_context(|| format!("bad value in column '{name}'"))
}

/// Load a recording; returns the full records plus the index-aligned
/// accelerometer and gyroscope streams the estimator consumes.
pub fn load_imu_file(path: &Path) -> Result<(Vec<ImuRecord>, Vec<TriadSample>, Vec<TriadSample>)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut acc = Vec::new();
    let mut gyro = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = ImuRecord::parse(&line)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        acc.push(record.acc_sample());
        gyro.push(record.gyro_sample());
        records.push(record);
    }
    Ok((records, acc, gyro))
}

/// Write records back out, tab-separated, one per line.
pub fn write_imu_file(path: &Path, records: &[ImuRecord]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for r in records {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.sec,
            r.nsec,
            r.acc_x,
            r.acc_y,
            r.acc_z,
            r.gyro_x,
            r.gyro_y,
            r.gyro_z,
            r.vel_x,
            r.vel_y,
            r.vel_z,
            r.pos_x,
            r.pos_y,
            r.pos_z,
            r.quat_w,
            r.quat_x,
            r.quat_y,
            r.quat_z
        )?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "5 250000000 0.1 0.2 9.8 0.01 0.02 0.03 0 0 0 1 2 3 1 0 0 0";

    #[test]
    fn test_parse_line() {
        let r = ImuRecord::parse(LINE).unwrap();
        assert_eq!(r.sec, 5);
        assert!((r.timestamp() - 5.25).abs() < 1e-12);
        assert!((r.acc_z - 9.8).abs() < 1e-12);
        assert_eq!(r.pos_z, 3.0);
    }

    #[test]
    fn test_parse_rejects_short_line() {
        assert!(ImuRecord::parse("1 2 3").is_err());
    }

    #[test]
    fn test_parse_rejects_fractional_seconds() {
        let line = LINE.replacen("5", "5.7", 1);
        assert!(ImuRecord::parse(&line).is_err());
    }

    #[test]
    fn test_parse_rejects_trailing_column() {
        let long = format!("{LINE} 42");
        assert!(ImuRecord::parse(&long).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join("imu_calib_test_roundtrip.imu");
        let original = ImuRecord::parse(LINE).unwrap();
        write_imu_file(&path, &[original.clone()]).unwrap();
        let (records, acc, gyro) = load_imu_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], original);
        assert_eq!(acc.len(), 1);
        assert!((gyro[0].x - 0.01).abs() < 1e-12);
    }
}
