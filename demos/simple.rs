use nalgebra::Vector3;
use rtfusion::{Ahrs, Sample};

const SAMPLE_PERIOD: f64 = 0.01; // 10 ms sample period

fn main() {
    env_logger::init();

    let mut ahrs = Ahrs::new();
    ahrs.set_compass_enable(false);

    for _ in 0..10 {
        // this loop should repeat each time new sensor data is available
        let gyroscope = Vector3::new(0.0, 0.0, 0.0); // replace this with actual gyroscope data in rad/s
        let accelerometer = Vector3::new(0.0, 0.0, 1.0); // replace this with actual accelerometer data in g
        let magnetometer = Vector3::zeros(); // unused while the compass is disabled

        let sample = Sample::new(gyroscope, accelerometer, magnetometer, SAMPLE_PERIOD);
        let pose = ahrs.update(&sample);

        println!(
            "Roll: {:.2}, Pitch: {:.2}, Yaw: {:.2}",
            pose.roll().to_degrees(),
            pose.pitch().to_degrees(),
            pose.yaw().to_degrees()
        );
    }
}
