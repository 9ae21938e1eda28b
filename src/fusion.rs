//! Fusion variant interface and the closed set of implementations
//!
//! Every variant owns its private state and is driven by the engine in the
//! same order each cycle: `predict` with the gyro, then `update` with the
//! cycle's [`Measurement`]. The first sample of a session seeds the state
//! through `initialise` instead.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::FusionResult;
use crate::kalman::KalmanState4;
use crate::madgwick::Madgwick;
use crate::mahony::Mahony;
use crate::rtqf::Rtqf;
use crate::types::{FusionKind, FusionSettings, Pose};

/// Per-cycle input to the update step
///
/// `accel` and `compass` are present only when the sensor is enabled and
/// its reading is valid for this sample.
#[derive(Debug, Clone, Copy)]
pub struct Measurement<'a> {
    /// Pose derived from accel and compass, sign-aligned with the fused pose
    pub pose: &'a Pose,
    pub accel: Option<Vector3<f64>>,
    pub compass: Option<Vector3<f64>>,
    /// Magnetic declination in radians
    pub declination: f64,
    /// Seconds since the previous sample
    pub time_delta: f64,
}

impl Measurement<'_> {
    /// Whether this cycle carries any absolute attitude information
    pub fn has_reference(&self) -> bool {
        self.accel.is_some() || self.compass.is_some()
    }
}

/// Capability shared by every fusion algorithm
pub trait FusionFilter {
    /// Which algorithm this is, for reporting and selection
    fn kind(&self) -> FusionKind;

    /// Adopt the tuning constants relevant to this variant
    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()>;

    /// Discard the running state, keeping configuration
    fn reset(&mut self);

    /// Seed the state from the first measured pose
    fn initialise(&mut self, measured: &Pose);

    /// Propagate the state by `time_delta` using the gyro rate, if any
    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64);

    /// Correct the predicted state towards the measurement
    fn update(&mut self, measurement: &Measurement<'_>);

    /// Current orientation estimate
    fn orientation(&self) -> UnitQuaternion<f64>;

    /// Latest prediction/measurement mismatch, where the variant tracks one
    fn correction(&self) -> Option<Quaternion<f64>> {
        None
    }
}

/// Measured-pose pass-through, no recursive filtering
#[derive(Debug, Clone)]
pub struct NullFusion {
    orientation: UnitQuaternion<f64>,
}

impl NullFusion {
    pub fn new() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
        }
    }
}

impl Default for NullFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionFilter for NullFusion {
    fn kind(&self) -> FusionKind {
        FusionKind::Null
    }

    fn configure(&mut self, _settings: &FusionSettings) -> FusionResult<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.orientation = UnitQuaternion::identity();
    }

    fn initialise(&mut self, measured: &Pose) {
        self.orientation = measured.quaternion;
    }

    fn predict(&mut self, _gyro: Option<Vector3<f64>>, _time_delta: f64) {}

    fn update(&mut self, measurement: &Measurement<'_>) {
        if measurement.has_reference() {
            self.orientation = measurement.pose.quaternion;
        }
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation
    }
}

/// Polymorphic handle over the supported fusion algorithms
#[derive(Debug, Clone)]
pub enum Fusion {
    Null(NullFusion),
    KalmanState4(KalmanState4),
    Rtqf(Rtqf),
    Madgwick(Madgwick),
    Mahony(Mahony),
}

impl Fusion {
    /// Build the variant named by `settings.kind`
    pub fn new(settings: &FusionSettings) -> FusionResult<Self> {
        let mut fusion = match settings.kind {
            FusionKind::Null => Fusion::Null(NullFusion::new()),
            FusionKind::KalmanState4 => Fusion::KalmanState4(KalmanState4::new()),
            FusionKind::Rtqf => Fusion::Rtqf(Rtqf::new()),
            FusionKind::Madgwick => Fusion::Madgwick(Madgwick::new()),
            FusionKind::Mahony => Fusion::Mahony(Mahony::new()),
        };
        fusion.configure(settings)?;
        Ok(fusion)
    }

    fn as_filter(&self) -> &dyn FusionFilter {
        match self {
            Fusion::Null(filter) => filter,
            Fusion::KalmanState4(filter) => filter,
            Fusion::Rtqf(filter) => filter,
            Fusion::Madgwick(filter) => filter,
            Fusion::Mahony(filter) => filter,
        }
    }

    fn as_filter_mut(&mut self) -> &mut dyn FusionFilter {
        match self {
            Fusion::Null(filter) => filter,
            Fusion::KalmanState4(filter) => filter,
            Fusion::Rtqf(filter) => filter,
            Fusion::Madgwick(filter) => filter,
            Fusion::Mahony(filter) => filter,
        }
    }
}

impl FusionFilter for Fusion {
    fn kind(&self) -> FusionKind {
        self.as_filter().kind()
    }

    fn configure(&mut self, settings: &FusionSettings) -> FusionResult<()> {
        self.as_filter_mut().configure(settings)
    }

    fn reset(&mut self) {
        self.as_filter_mut().reset()
    }

    fn initialise(&mut self, measured: &Pose) {
        self.as_filter_mut().initialise(measured)
    }

    fn predict(&mut self, gyro: Option<Vector3<f64>>, time_delta: f64) {
        self.as_filter_mut().predict(gyro, time_delta)
    }

    fn update(&mut self, measurement: &Measurement<'_>) {
        self.as_filter_mut().update(measurement)
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        self.as_filter().orientation()
    }

    fn correction(&self) -> Option<Quaternion<f64>> {
        self.as_filter().correction()
    }
}

/// Small-angle rotation `(1, w*dt/2)` for a body rate `w`, normalized
pub(crate) fn gyro_delta(gyro: &Vector3<f64>, time_delta: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::new_normalize(Quaternion::from_parts(1.0, gyro * (0.5 * time_delta)))
}

/// Rotate a body-frame field so that magnetic north lines up with true north
///
/// The field is taken to the world frame with `orientation`, turned about
/// the vertical by `declination` and brought back to the body frame.
pub(crate) fn declination_corrected(
    orientation: &UnitQuaternion<f64>,
    compass: &Vector3<f64>,
    declination: f64,
) -> Vector3<f64> {
    if declination == 0.0 {
        return *compass;
    }
    let turn = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), declination);
    (orientation.conjugate() * turn * orientation) * compass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::QuaternionExt;

    #[test]
    fn test_every_kind_builds() {
        for kind in FusionKind::ALL {
            let settings = FusionSettings {
                kind,
                ..Default::default()
            };
            let fusion = Fusion::new(&settings).unwrap();
            assert_eq!(fusion.kind(), kind);
            assert_eq!(fusion.orientation(), UnitQuaternion::identity());
        }
    }

    #[test]
    fn test_gyro_delta() {
        let delta = gyro_delta(&Vector3::new(0.0, 0.0, 1.0), 0.01);
        let (axis, angle) = delta.axis_angle().unwrap();
        assert!((axis.z - 1.0).abs() < 1e-12);
        assert!((angle - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_declination_corrected() {
        let declination = 10.0f64.to_radians();
        let orientation = UnitQuaternion::from_euler_degrees(5.0, -3.0, 40.0);
        // Field as the body would see it if magnetic north sat at -declination
        let world = Vector3::new(declination.cos(), -declination.sin(), -0.8);
        let body = orientation.conjugate().rotate_vec(&world);

        let corrected = declination_corrected(&orientation, &body, declination);
        let in_world = orientation.rotate_vec(&corrected);
        assert!(in_world.y.abs() < 1e-9);
        assert!((in_world.x - 1.0).abs() < 1e-9);
        assert!((in_world.z + 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_null_passes_measurement_through() {
        let mut fusion = NullFusion::new();
        let pose = Pose::from_quaternion(UnitQuaternion::from_euler_degrees(10.0, 0.0, 30.0));
        let measurement = Measurement {
            pose: &pose,
            accel: Some(Vector3::z()),
            compass: None,
            declination: 0.0,
            time_delta: 0.01,
        };
        fusion.predict(Some(Vector3::new(1.0, 1.0, 1.0)), 0.01);
        fusion.update(&measurement);
        assert_eq!(fusion.orientation(), pose.quaternion);
    }
}
