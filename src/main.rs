use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use imu_calib::estimator::{calibrate_imu, CalibrationConfig};
use imu_calib::io::{load_imu_file, write_imu_file};
use imu_calib::{correct_records, solver::LmSettings};

#[derive(Parser, Debug)]
#[command(name = "calib_and_correct")]
#[command(about = "Calibrate an IMU from a multi-position recording and correct a second recording", long_about = None)]
struct Args {
    /// Calibration recording (.imu) with the initial still period and
    /// several held-still orientations
    calib_file: PathBuf,

    /// Recording (.imu) to correct with the fitted models
    target_file: PathBuf,

    /// Corrected output path
    #[arg(long, default_value = "calibrated_out.imu")]
    output: PathBuf,

    /// Accelerometer calibration artifact path
    #[arg(long, default_value = "imu_acc.calib")]
    acc_calib: PathBuf,

    /// Gyroscope calibration artifact path
    #[arg(long, default_value = "imu_gyro.calib")]
    gyro_calib: PathBuf,

    /// JSON calibration report path
    #[arg(long, default_value = "calibration_report.json")]
    report: PathBuf,

    /// Initial still duration in seconds
    #[arg(long, default_value = "30.0")]
    init_duration: f64,

    /// Local gravity magnitude in m/s²
    #[arg(long, default_value = "9.797")]
    gravity: f64,

    /// Static-detector window in samples (0 = derive from sampling rate)
    #[arg(long, default_value = "0")]
    window_size: usize,

    /// One accelerometer residual per interval mean instead of per sample
    #[arg(long)]
    use_means: bool,

    /// Log per-iteration solver state
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    samples: usize,
    static_intervals: usize,
    acc_rms_residual: f64,
    gyro_rms_residual: f64,
    gravity_magnitude: f64,
    acc_use_means: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("Importing calibration data from {}", args.calib_file.display());
    let (_, acc, gyro) = load_imu_file(&args.calib_file)?;

    let config = CalibrationConfig {
        init_still_duration_s: args.init_duration,
        gravity_magnitude: args.gravity,
        window_size: args.window_size,
        acc_use_means: args.use_means,
        verbose: args.verbose,
        solver: LmSettings {
            verbose: args.verbose,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = calibrate_imu(&acc, &gyro, &config)
        .with_context(|| format!("calibrating from {}", args.calib_file.display()))?;

    println!("Accelerometer calibration:\n{}", result.acc);
    println!("Gyroscope calibration:\n{}", result.gyro);

    result.acc.save(&args.acc_calib)?;
    result.gyro.save(&args.gyro_calib)?;
    println!(
        "Saved artifacts to {} and {}",
        args.acc_calib.display(),
        args.gyro_calib.display()
    );

    let report = Report {
        samples: acc.len(),
        static_intervals: result.intervals.len(),
        acc_rms_residual: result.acc_rms_residual,
        gyro_rms_residual: result.gyro_rms_residual,
        gravity_magnitude: args.gravity,
        acc_use_means: args.use_means,
    };
    std::fs::write(&args.report, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing {}", args.report.display()))?;

    println!("Importing data for correction from {}", args.target_file.display());
    let (records, _, _) = load_imu_file(&args.target_file)?;
    let corrected = correct_records(&records, &result.acc, &result.gyro);
    write_imu_file(&args.output, &corrected)?;
    println!("Wrote {} corrected records to {}", corrected.len(), args.output.display());

    Ok(())
}
