//! Mahony's proportional-integral complementary filter
//!
//! Error between the observed and predicted gravity (and magnetic field)
//! directions is fed back as a corrective body rate: the proportional part
//! is applied in the update step, the integral part accumulates a gyro
//! bias estimate that the predict step removes.

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::FusionResult;
use crate::fusion::{FusionFilter, Measurement, declination_corrected, gyro_delta};
use crate::math::{QuaternionExt, Vector3Ext};
use crate::types::{FusionKind, FusionSettings, Pose, check_gain};

#[derive(Debug, Clone)]
pub struct Mahony {
    q: UnitQuaternion<f64>,
    kp: f64,
    ki: f64,
    /// Integral feedback, added to the gyro rate
    integral: Vector3<f64>,
    /// Latest direction error
    error: Vector3<f64>,
}

/// Feedback rotating `reference` onto `sensor`
///
/// Plain cross product, except for opposing vectors where it is normalized
/// so the correction does not fade as the error approaches 180 degrees.
fn calculate_feedback(sensor: &Vector3<f64>, reference: &Vector3<f64>) -> Vector3<f64> {
    let cross = sensor.cross(reference);
    if sensor.dot(reference) < 0.0 {
        cross.try_unit().unwrap_or(cross)
    } else {
        cross
    }
}

impl Mahony {
    pub fn new() -> Self {
        let defaults = FusionSettings::default();
        Self {
            q: UnitQuaternion::identity(),
            kp: defaults.mahony_kp,
            ki: defaults.mahony_ki,
            integral: Vector3::zeros(),
            error: Vector3::zeros(),
        }
    }

    /// Change both gains; either being invalid leaves both unchanged
    pub fn set_gains(&mut self, kp: f64, ki: f64) -> FusionResult<()> {
        check_gain("mahony_kp", kp, |v| v >= 0.0)?;
        check_gain("mahony_ki", ki, |v| v >= 0.0)?;
        self.kp = kp;
        self.ki = ki;
        if ki == 0.0 {
            self.integral = Vector3::zeros();
        }
        Ok(())
    }

    pub fn gains(&self) -> (f64, f64) {
        (self.kp, self.ki)
    }

    /// Current gyro bias estimate (negated integral feedback)
    pub fn gyro_bias(&self) -> Vector3<f64> {
        -self.integral
    }

    pub fn error(&self) -> Vector3<f64> {
        self.error
    }
}

impl Default for Mahony {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionFilter for Mahony {
    fn kind(&self) -> FusionKind {
        FusionKind::Mahony
    }

    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()> {
        self.set_gains(settings.mahony_kp, settings.mahony_ki)
    }

    fn reset(&mut self) {
        self.q = UnitQuaternion::identity();
        self.integral = Vector3::zeros();
        self.error = Vector3::zeros();
    }

    fn initialise(&mut self, measured: &Pose) {
        self.q = measured.quaternion;
        self.integral = Vector3::zeros();
        self.error = Vector3::zeros();
    }

    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64) {
        if let Some(gyro) = gyro {
            self.q *= gyro_delta(&(gyro + self.integral), time_delta);
            self.q.renormalize();
        }
    }

    fn update(&mut self, measurement: &Measurement<'_>) {
        let mut error = Vector3::zeros();

        if let Some(a) = measurement.accel.and_then(|a| a.try_unit().ok()) {
            let gravity = self.q.conjugate().rotate_vec(&Vector3::z());
            error += calculate_feedback(&a, &gravity);
        }

        let compass = measurement.compass.and_then(|m| {
            declination_corrected(&self.q, &m, measurement.declination)
                .try_unit()
                .ok()
        });
        if let Some(m) = compass {
            let h = self.q.rotate_vec(&m);
            let earth_field = Vector3::new((h.x * h.x + h.y * h.y).sqrt(), 0.0, h.z);
            let expected = self.q.conjugate().rotate_vec(&earth_field);
            error += calculate_feedback(&m, &expected);
        }

        self.error = error;
        if self.ki > 0.0 {
            self.integral += error * (self.ki * measurement.time_delta);
        }

        self.q *= gyro_delta(&(error * self.kp), measurement.time_delta);
        self.q.renormalize();
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        self.q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stationary(truth: &UnitQuaternion<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let accel = truth.conjugate().rotate_vec(&Vector3::z());
        let compass = truth.conjugate().rotate_vec(&Vector3::new(0.6, 0.0, -0.8));
        (accel, compass)
    }

    fn run(mahony: &mut Mahony, gyro: Vector3<f64>, truth: &UnitQuaternion<f64>, cycles: usize) {
        let (accel, compass) = stationary(truth);
        let pose = Pose::identity();
        let measurement = Measurement {
            pose: &pose,
            accel: Some(accel),
            compass: Some(compass),
            declination: 0.0,
            time_delta: 0.01,
        };
        for _ in 0..cycles {
            mahony.predict(Some(gyro), 0.01);
            mahony.update(&measurement);
        }
    }

    #[test]
    fn test_feedback_opposing_vectors() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(-1.0, 0.01, 0.0);
        let feedback = calculate_feedback(&a, &b);
        assert!((feedback.norm() - 1.0).abs() < 1e-12);

        let aligned = calculate_feedback(&a, &a);
        assert_eq!(aligned, Vector3::zeros());
    }

    #[test]
    fn test_converges_to_orientation() {
        let mut mahony = Mahony::new();
        mahony.set_gains(2.0, 0.0).unwrap();

        let truth = UnitQuaternion::from_euler_degrees(15.0, -20.0, 60.0);
        run(&mut mahony, Vector3::zeros(), &truth, 2000);

        let residual = mahony.orientation().angle_to(&truth);
        assert!(residual < 0.5f64.to_radians(), "residual = {residual}");
    }

    #[test]
    fn test_integral_learns_gyro_bias() {
        let mut mahony = Mahony::new();
        mahony.set_gains(1.0, 0.3).unwrap();

        let truth = UnitQuaternion::identity();
        let bias = Vector3::new(0.0, 0.0, 0.05);
        run(&mut mahony, bias, &truth, 6000);

        assert!((mahony.gyro_bias() - bias).norm() < 0.005, "bias = {}", mahony.gyro_bias());
        assert!(mahony.orientation().angle_to(&truth) < 1.0f64.to_radians());
    }

    #[test]
    fn test_set_gains_validation() {
        let mut mahony = Mahony::new();
        assert!(mahony.set_gains(-1.0, 0.0).is_err());
        assert!(mahony.set_gains(1.0, f64::NAN).is_err());
        assert_eq!(mahony.gains(), (1.0, 0.0));
    }
}
