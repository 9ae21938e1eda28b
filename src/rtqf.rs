//! RTQF: quaternion complementary filter with slerp correction
//!
//! Predict integrates the gyro rate into the state quaternion. Update
//! computes the rotation that would carry the prediction onto the measured
//! pose and applies a fixed fraction of it (the slerp power). Both steps
//! stay in quaternion space, so the correction never passes through Euler
//! angles and is free of gimbal-lock artifacts.

use log::trace;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::FusionResult;
use crate::fusion::{FusionFilter, Measurement, gyro_delta};
use crate::math::{Vector3Ext, try_unit_quaternion};
use crate::types::{FusionKind, FusionSettings, Pose, check_slerp_power};

/// Default fraction of the measured correction applied per cycle
pub const DEFAULT_SLERP_POWER: f64 = 0.02;

/// RTQF filter state
#[derive(Debug, Clone)]
pub struct Rtqf {
    /// Primary filter state
    state_q: UnitQuaternion<f64>,
    /// Rotation from the predicted state to the latest measurement
    state_q_error: Quaternion<f64>,
    /// Seconds covered by the latest predict step
    time_delta: f64,
    /// Correction gain in `[0, 1]`
    slerp_power: f64,
}

impl Rtqf {
    pub fn new() -> Self {
        Self {
            state_q: UnitQuaternion::identity(),
            state_q_error: Quaternion::identity(),
            time_delta: 0.0,
            slerp_power: DEFAULT_SLERP_POWER,
        }
    }

    pub fn slerp_power(&self) -> f64 {
        self.slerp_power
    }

    /// Change the correction gain; out-of-range values leave the old gain
    pub fn set_slerp_power(&mut self, slerp_power: f64) -> FusionResult<()> {
        check_slerp_power(slerp_power)?;
        self.slerp_power = slerp_power;
        Ok(())
    }

    pub fn state(&self) -> UnitQuaternion<f64> {
        self.state_q
    }

    pub fn time_delta(&self) -> f64 {
        self.time_delta
    }
}

impl Default for Rtqf {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction `power` of the rotation `delta`
///
/// `delta` is split into half-angle and unit axis, the angle scaled by
/// `power` and the quaternion rebuilt. Fails when the axis is undefined,
/// i.e. `delta` is (numerically) no rotation at all.
fn partial_rotation(delta: &UnitQuaternion<f64>, power: f64) -> FusionResult<UnitQuaternion<f64>> {
    let delta = delta.quaternion();
    let axis = delta.imag().try_unit()?;
    let half_angle = delta.w.clamp(-1.0, 1.0).acos();
    let (sin, cos) = (half_angle * power).sin_cos();
    try_unit_quaternion(Quaternion::from_parts(cos, axis * sin))
}

impl FusionFilter for Rtqf {
    fn kind(&self) -> FusionKind {
        FusionKind::Rtqf
    }

    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()> {
        self.set_slerp_power(settings.slerp_power)
    }

    fn reset(&mut self) {
        self.state_q = UnitQuaternion::identity();
        self.state_q_error = Quaternion::identity();
        self.time_delta = 0.0;
    }

    fn initialise(&mut self, measured: &Pose) {
        self.state_q = measured.quaternion;
        self.state_q_error = Quaternion::identity();
    }

    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64) {
        self.time_delta = time_delta;
        let Some(gyro) = gyro else {
            return;
        };
        self.state_q *= gyro_delta(&gyro, time_delta);
        self.state_q.renormalize();
    }

    fn update(&mut self, measurement: &Measurement<'_>) {
        if !measurement.has_reference() {
            self.state_q_error = Quaternion::identity();
            return;
        }

        let rotation_delta = self.state_q.conjugate() * measurement.pose.quaternion;
        self.state_q_error = rotation_delta.into_inner();

        let rotation_power = partial_rotation(&rotation_delta, self.slerp_power)
            .unwrap_or_else(|err| {
                trace!("no slerp correction this cycle: {err}");
                UnitQuaternion::identity()
            });

        self.state_q *= rotation_power;
        self.state_q.renormalize();
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        self.state_q
    }

    fn correction(&self) -> Option<Quaternion<f64>> {
        Some(self.state_q_error)
    }
}
