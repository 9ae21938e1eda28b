//! Recorded trace comparison
//!
//! Runs every fusion variant over the same recorded sensor trace and plots
//! the resulting Euler angles side by side, together with the pose measured
//! from accelerometer and compass alone.
//!
//! Run with: `cargo run --example plot_trace [path/to/trace.csv]`

use log::info;
use nalgebra::Vector3;
use plotters::prelude::*;
use rtfusion::{Ahrs, FusionKind, FusionSettings, Sample};
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct SensorData {
    #[serde(rename = "Time (s)")]
    time: f64,
    #[serde(rename = "Gyroscope X (rad/s)")]
    gyro_x: f64,
    #[serde(rename = "Gyroscope Y (rad/s)")]
    gyro_y: f64,
    #[serde(rename = "Gyroscope Z (rad/s)")]
    gyro_z: f64,
    #[serde(rename = "Accelerometer X (g)")]
    accel_x: f64,
    #[serde(rename = "Accelerometer Y (g)")]
    accel_y: f64,
    #[serde(rename = "Accelerometer Z (g)")]
    accel_z: f64,
    #[serde(rename = "Magnetometer X (uT)")]
    mag_x: f64,
    #[serde(rename = "Magnetometer Y (uT)")]
    mag_y: f64,
    #[serde(rename = "Magnetometer Z (uT)")]
    mag_z: f64,
}

const OUTPUT: &str = "fusion_trace.png";
const COLORS: [RGBColor; 5] = [
    RGBColor(128, 128, 128),
    RGBColor(255, 165, 0),
    RED,
    GREEN,
    BLUE,
];

/// Euler angles in degrees for one run
struct Run {
    label: String,
    euler: Vec<Vector3<f64>>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "testdata/stationary_trace.csv".to_string());
    let mut reader = csv::Reader::from_path(&path)?;
    let mut sensor_data = Vec::new();
    for result in reader.deserialize() {
        let record: SensorData = result?;
        sensor_data.push(record);
    }
    if sensor_data.is_empty() {
        return Err(format!("{path} holds no samples").into());
    }
    info!("loaded {} samples from {path}", sensor_data.len());

    let samples: Vec<Sample> = sensor_data
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let time_delta = if i == 0 {
                0.01
            } else {
                data.time - sensor_data[i - 1].time
            };
            Sample::new(
                Vector3::new(data.gyro_x, data.gyro_y, data.gyro_z),
                Vector3::new(data.accel_x, data.accel_y, data.accel_z),
                Vector3::new(data.mag_x, data.mag_y, data.mag_z),
                time_delta,
            )
        })
        .collect();

    let mut runs = Vec::new();
    let mut measured = Vec::with_capacity(samples.len());
    for kind in FusionKind::ALL {
        let mut ahrs = Ahrs::with_settings(FusionSettings {
            kind,
            ..Default::default()
        })?;
        let mut euler = Vec::with_capacity(samples.len());
        for sample in &samples {
            euler.push(ahrs.update(sample).euler.map(f64::to_degrees));
            if kind == FusionKind::Null {
                measured.push(ahrs.measured_pose().euler.map(f64::to_degrees));
            }
        }

        let last = euler[euler.len() - 1];
        println!(
            "{:>14}: roll {:7.2}  pitch {:7.2}  yaw {:7.2}",
            kind.name(),
            last.x,
            last.y,
            last.z
        );
        runs.push(Run {
            label: kind.name().to_string(),
            euler,
        });
    }
    runs[0].label = "Measured".to_string();
    runs[0].euler = measured;

    let times: Vec<f64> = sensor_data.iter().map(|d| d.time).collect();
    create_plots(&times, &runs)?;
    println!("Plots saved to {OUTPUT}");
    Ok(())
}

/// Plot roll, pitch and yaw of every run in three stacked panels
fn create_plots(times: &[f64], runs: &[Run]) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(OUTPUT, (1000, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((3, 1));

    let time_range = times[0]..times[times.len() - 1];
    let titles = ["Roll", "Pitch", "Yaw"];

    for (axis, panel) in panels.iter().enumerate() {
        let (low, high) = runs
            .iter()
            .flat_map(|run| run.euler.iter().map(move |e| e[axis]))
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let pad = ((high - low) * 0.1).max(0.5);

        let mut chart = ChartBuilder::on(panel)
            .caption(titles[axis], ("sans-serif", 18))
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(time_range.clone(), (low - pad)..(high + pad))?;

        chart
            .configure_mesh()
            .x_desc("Time (s)")
            .y_desc("Degrees")
            .draw()?;

        for (run, color) in runs.iter().zip(COLORS) {
            chart
                .draw_series(LineSeries::new(
                    times.iter().zip(&run.euler).map(|(t, e)| (*t, e[axis])),
                    &color,
                ))?
                .label(run.label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}
