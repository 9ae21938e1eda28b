//! Madgwick's gradient-descent orientation filter
//!
//! The gyro rate is integrated in the predict step. The update step takes
//! one normalized gradient-descent step of size `beta * dt` on the
//! alignment error between the predicted and observed gravity (and, when
//! available, magnetic field) directions.
//!
//! # References
//!
//! - [Madgwick's internal report](http://x-io.co.uk/res/doc/madgwick_internal_report.pdf)

use log::trace;
use nalgebra::{Matrix3x4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::error::FusionResult;
use crate::fusion::{FusionFilter, Measurement, declination_corrected, gyro_delta};
use crate::math::{QuaternionExt, Vector3Ext, try_unit_quaternion};
use crate::types::{FusionKind, FusionSettings, Pose, check_gain};

#[derive(Debug, Clone)]
pub struct Madgwick {
    q: UnitQuaternion<f64>,
    beta: f64,
}

impl Madgwick {
    pub fn new() -> Self {
        Self {
            q: UnitQuaternion::identity(),
            beta: FusionSettings::default().madgwick_beta,
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Change the step gain; negative or non-finite values are rejected
    pub fn set_beta(&mut self, beta: f64) -> FusionResult<()> {
        check_gain("madgwick_beta", beta, |v| v >= 0.0)?;
        self.beta = beta;
        Ok(())
    }

    /// Objective gradient `J^T f` for the available references
    fn gradient(&self, accel: Option<Vector3<f64>>, compass: Option<Vector3<f64>>) -> Vector4<f64> {
        let [q1, q2, q3, q4] = self.q.components();
        let mut nabla = Vector4::zeros();

        if let Some(a) = accel {
            // Eq. 25 & 26
            let f_g = Vector3::new(
                2.0 * (q2 * q4 - q1 * q3) - a.x,
                2.0 * (q1 * q2 + q3 * q4) - a.y,
                2.0 * (0.5 - q2 * q2 - q3 * q3) - a.z,
            );
            #[rustfmt::skip]
            let j_g = Matrix3x4::new(
                -2.0 * q3, 2.0 * q4, -2.0 * q1, 2.0 * q2,
                2.0 * q2, 2.0 * q1, 2.0 * q4, 2.0 * q3,
                0.0, -4.0 * q2, -4.0 * q3, 0.0,
            );
            nabla += j_g.transpose() * f_g;
        }

        if let Some(m) = compass {
            // Earth field direction (Eq. 45 & 46)
            let h = self.q.rotate_vec(&m);
            let bx = (h.x * h.x + h.y * h.y).sqrt();
            let bz = h.z;

            // Eq. 29 & 30
            let f_b = Vector3::new(
                2.0 * bx * (0.5 - q3 * q3 - q4 * q4) + 2.0 * bz * (q2 * q4 - q1 * q3) - m.x,
                2.0 * bx * (q2 * q3 - q1 * q4) + 2.0 * bz * (q1 * q2 + q3 * q4) - m.y,
                2.0 * bx * (q1 * q3 + q2 * q4) + 2.0 * bz * (0.5 - q2 * q2 - q3 * q3) - m.z,
            );
            #[rustfmt::skip]
            let j_b = Matrix3x4::new(
                -2.0 * bz * q3,
                2.0 * bz * q4,
                -4.0 * bx * q3 - 2.0 * bz * q1,
                -4.0 * bx * q4 + 2.0 * bz * q2,

                -2.0 * bx * q4 + 2.0 * bz * q2,
                2.0 * bx * q3 + 2.0 * bz * q1,
                2.0 * bx * q2 + 2.0 * bz * q4,
                -2.0 * bx * q1 + 2.0 * bz * q3,

                2.0 * bx * q3,
                2.0 * bx * q4 - 4.0 * bz * q2,
                2.0 * bx * q1 - 4.0 * bz * q3,
                2.0 * bx * q2,
            );
            nabla += j_b.transpose() * f_b;
        }

        nabla
    }
}

impl Default for Madgwick {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionFilter for Madgwick {
    fn kind(&self) -> FusionKind {
        FusionKind::Madgwick
    }

    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()> {
        self.set_beta(settings.madgwick_beta)
    }

    fn reset(&mut self) {
        self.q = UnitQuaternion::identity();
    }

    fn initialise(&mut self, measured: &Pose) {
        self.q = measured.quaternion;
    }

    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64) {
        if let Some(gyro) = gyro {
            self.q *= gyro_delta(&gyro, time_delta);
            self.q.renormalize();
        }
    }

    fn update(&mut self, measurement: &Measurement<'_>) {
        let accel = measurement.accel.and_then(|a| a.try_unit().ok());
        let compass = measurement.compass.and_then(|m| {
            declination_corrected(&self.q, &m, measurement.declination)
                .try_unit()
                .ok()
        });
        if accel.is_none() && compass.is_none() {
            return;
        }

        let nabla = self.gradient(accel, compass);
        let step = match try_unit_quaternion(Quaternion::new(nabla[0], nabla[1], nabla[2], nabla[3])) {
            Ok(step) => step,
            Err(err) => {
                trace!("madgwick gradient vanished: {err}");
                return;
            }
        };

        let corrected = self.q.into_inner() - step.into_inner() * (self.beta * measurement.time_delta);
        match try_unit_quaternion(corrected) {
            Ok(q) => self.q = q,
            Err(err) => trace!("madgwick step discarded: {err}"),
        }
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        self.q
    }
}
