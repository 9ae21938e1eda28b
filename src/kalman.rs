//! Four-state quaternion Kalman filter
//!
//! The state is the orientation quaternion as a 4-vector `(w, x, y, z)`.
//! The measured quaternion is observed directly (identity observation
//! matrix), so the gain reduces to `K = P (P + R)^-1`.

use log::trace;
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::error::{FusionError, FusionResult};
use crate::fusion::{FusionFilter, Measurement};
use crate::math::try_unit_quaternion;
use crate::types::{FusionKind, FusionSettings, Pose, check_gain};

#[derive(Debug, Clone)]
pub struct KalmanState4 {
    state: Vector4<f64>,
    covariance: Matrix4<f64>,
    /// Process noise
    q: Matrix4<f64>,
    /// Observation noise
    r: Matrix4<f64>,
    state_error: Vector4<f64>,
}

fn to_vector(q: &Quaternion<f64>) -> Vector4<f64> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

fn to_quaternion(v: &Vector4<f64>) -> Quaternion<f64> {
    Quaternion::new(v[0], v[1], v[2], v[3])
}

/// Rate matrix `F` with `dq/dt = F q` for body rate `gyro`
fn rate_matrix(gyro: &Vector3<f64>) -> Matrix4<f64> {
    let (x2, y2, z2) = (gyro.x / 2.0, gyro.y / 2.0, gyro.z / 2.0);

    #[rustfmt::skip]
    let f = Matrix4::new(
        0.0, -x2, -y2, -z2,
        x2,  0.0,  z2, -y2,
        y2,  -z2, 0.0,  x2,
        z2,   y2, -x2, 0.0,
    );
    f
}

impl KalmanState4 {
    pub fn new() -> Self {
        let defaults = FusionSettings::default();
        Self {
            state: Vector4::new(1.0, 0.0, 0.0, 0.0),
            covariance: Matrix4::identity() * defaults.kalman_q,
            q: Matrix4::identity() * defaults.kalman_q,
            r: Matrix4::identity() * defaults.kalman_r,
            state_error: Vector4::zeros(),
        }
    }

    pub fn covariance(&self) -> &Matrix4<f64> {
        &self.covariance
    }

    fn normalize_state(&mut self) {
        match try_unit_quaternion(to_quaternion(&self.state)) {
            Ok(unit) => self.state = to_vector(unit.quaternion()),
            Err(err) => {
                trace!("kalman state collapsed ({err}), restarting from identity");
                self.state = Vector4::new(1.0, 0.0, 0.0, 0.0);
            }
        }
    }

    fn gain(&self) -> FusionResult<Matrix4<f64>> {
        let innovation = self.covariance + self.r;
        let inverse = innovation.try_inverse().ok_or(FusionError::DegenerateInput)?;
        Ok(self.covariance * inverse)
    }
}

impl Default for KalmanState4 {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionFilter for KalmanState4 {
    fn kind(&self) -> FusionKind {
        FusionKind::KalmanState4
    }

    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()> {
        check_gain("kalman_q", settings.kalman_q, |v| v > 0.0)?;
        check_gain("kalman_r", settings.kalman_r, |v| v > 0.0)?;
        self.q = Matrix4::identity() * settings.kalman_q;
        self.r = Matrix4::identity() * settings.kalman_r;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = Vector4::new(1.0, 0.0, 0.0, 0.0);
        self.covariance = self.q;
        self.state_error = Vector4::zeros();
    }

    fn initialise(&mut self, measured: &Pose) {
        self.state = to_vector(measured.quaternion.quaternion());
        self.covariance = self.q;
        self.state_error = Vector4::zeros();
    }

    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64) {
        let f = gyro.map(|gyro| rate_matrix(&gyro)).unwrap_or_else(Matrix4::zeros);
        let transition = Matrix4::identity() + f * time_delta;

        self.state = transition * self.state;
        self.normalize_state();
        self.covariance = transition * self.covariance * transition.transpose() + self.q * time_delta;
    }

    fn update(&mut self, measurement: &Measurement<'_>) {
        if !measurement.has_reference() {
            self.state_error = Vector4::zeros();
            return;
        }

        self.state_error = to_vector(measurement.pose.quaternion.quaternion()) - self.state;

        let gain = match self.gain() {
            Ok(gain) => gain,
            Err(err) => {
                trace!("kalman update skipped: {err}");
                return;
            }
        };

        self.state += gain * self.state_error;
        self.normalize_state();
        self.covariance = (Matrix4::identity() - gain) * self.covariance;
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::new_normalize(to_quaternion(&self.state))
    }

    fn correction(&self) -> Option<Quaternion<f64>> {
        Some(to_quaternion(&self.state_error))
    }
}
