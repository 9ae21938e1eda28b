//! State and measurement logic shared by every fusion variant

use log::{debug, trace};
use nalgebra::{UnitQuaternion, Vector3};

use crate::math::{QuaternionExt, Vector3Ext, wrap_angle};
use crate::types::{FusionSettings, Pose, Sample};

/// Shared fusion state
///
/// Holds the published (fused) pose, the transient measured pose and the
/// operator policy flags. The measured pose is derived from accelerometer
/// and compass alone, independent of any recursive filter state.
#[derive(Debug, Clone)]
pub struct FusionCore {
    pub(crate) enable_gyro: bool,
    pub(crate) enable_accel: bool,
    pub(crate) enable_compass: bool,
    pub(crate) magnetic_declination: f64,
    pub(crate) debug: bool,
    /// Best estimate, carried across cycles
    fusion_pose: Pose,
    /// Latest accel/compass-only estimate
    measured_pose: Pose,
    /// Whether the latest compass reading was usable
    compass_valid: bool,
    /// True until the first sample seeds the state
    first_time: bool,
    sample_number: u64,
}

impl FusionCore {
    pub fn new(settings: &FusionSettings) -> Self {
        let mut core = Self {
            enable_gyro: true,
            enable_accel: true,
            enable_compass: true,
            magnetic_declination: 0.0,
            debug: false,
            fusion_pose: Pose::identity(),
            measured_pose: Pose::identity(),
            compass_valid: false,
            first_time: true,
            sample_number: 0,
        };
        core.configure(settings);
        core
    }

    /// Adopt policy flags from `settings`, keeping the running state
    pub fn configure(&mut self, settings: &FusionSettings) {
        self.enable_gyro = settings.enable_gyro;
        self.enable_accel = settings.enable_accel;
        self.enable_compass = settings.enable_compass;
        self.magnetic_declination = settings.magnetic_declination;
        self.debug = settings.debug;
    }

    /// Return to the bootstrap state, keeping configuration
    pub fn reset(&mut self) {
        self.fusion_pose = Pose::identity();
        self.measured_pose = Pose::identity();
        self.compass_valid = false;
        self.first_time = true;
        self.sample_number = 0;
    }

    pub fn fusion_pose(&self) -> &Pose {
        &self.fusion_pose
    }

    pub fn measured_pose(&self) -> &Pose {
        &self.measured_pose
    }

    pub fn compass_valid(&self) -> bool {
        self.compass_valid
    }

    pub fn is_first_time(&self) -> bool {
        self.first_time
    }

    pub fn sample_number(&self) -> u64 {
        self.sample_number
    }

    pub(crate) fn count_sample(&mut self) -> u64 {
        self.sample_number += 1;
        self.sample_number
    }

    /// Gyroscope reading to integrate this cycle, if enabled and valid
    pub fn gyro_input(&self, sample: &Sample) -> Option<Vector3<f64>> {
        if !self.enable_gyro {
            return None;
        }
        sample
            .gyro()
            .inspect_err(|err| trace!("skipping predict: {err}"))
            .ok()
    }

    /// Accelerometer reading to fuse this cycle, if enabled and valid
    pub fn accel_input(&self, sample: &Sample) -> Option<Vector3<f64>> {
        if !self.enable_accel {
            return None;
        }
        sample
            .accel()
            .inspect_err(|err| trace!("{err}"))
            .ok()
    }

    /// Compass reading to fuse this cycle, if enabled, valid and non-zero
    pub fn compass_input(&self, sample: &Sample) -> Option<Vector3<f64>> {
        if !self.enable_compass {
            return None;
        }
        match sample.compass() {
            Ok(compass) if compass.norm() > 0.0 => Some(compass),
            Ok(_) => {
                trace!("zero compass reading, heading carried forward");
                None
            }
            Err(err) => {
                trace!("{err}");
                None
            }
        }
    }

    /// Derive the measured pose for `sample`
    ///
    /// Roll and pitch come from the accelerometer and heading from the
    /// tilt-compensated compass. A component whose sensor is disabled or
    /// unusable is carried over from the current fused pose. The returned
    /// quaternion is sign-aligned with the fused quaternion.
    pub fn calculate_pose(&self, sample: &Sample) -> Pose {
        let fused = &self.fusion_pose;

        let mut euler = match self.accel_input(sample).map(|accel| accel.accel_to_euler()) {
            Some(Ok(tilt)) => tilt,
            Some(Err(err)) => {
                debug!("accelerometer tilt unavailable ({err}), carrying roll and pitch");
                Vector3::new(fused.roll(), fused.pitch(), 0.0)
            }
            None => Vector3::new(fused.roll(), fused.pitch(), 0.0),
        };

        euler.z = match self.compass_input(sample) {
            Some(compass) => {
                // Level the field using roll and pitch only (yaw is still zero)
                let tilt = UnitQuaternion::from_euler(&euler);
                let horizontal = tilt.rotate_vec(&compass);
                wrap_angle(-horizontal.y.atan2(horizontal.x) - self.magnetic_declination)
            }
            None => fused.yaw(),
        };

        let quaternion = UnitQuaternion::from_euler(&euler);
        let (quaternion, flipped) = quaternion.aligned_to(&fused.quaternion);
        if flipped {
            trace!("measured quaternion negated to match fused sign");
            euler = quaternion.to_euler();
        }

        Pose { euler, quaternion }
    }

    /// Measured acceleration with gravity removed, in the body frame
    ///
    /// The unit gravity vector is rotated into the body frame with the
    /// fused orientation and subtracted from `accel`; the result is negated.
    pub fn accel_residuals(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        let gravity = self
            .fusion_pose
            .quaternion
            .conjugate()
            .rotate_vec(&Vector3::z());
        -(accel - gravity)
    }

    /// Raw (gravity-inclusive) acceleration rotated into the world frame
    pub fn accel_global_frame(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        self.fusion_pose.quaternion.rotate_vec(accel)
    }

    pub(crate) fn record_measurement(&mut self, sample: &Sample, measured: Pose) {
        self.compass_valid = sample.compass_valid;
        self.measured_pose = measured;
    }

    /// Publish a new fused orientation and leave the bootstrap state
    pub(crate) fn publish(&mut self, orientation: UnitQuaternion<f64>) {
        self.fusion_pose = Pose::from_quaternion(orientation);
        self.first_time = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;
    fn field() -> Vector3<f64> {
        Vector3::new(0.6, 0.0, -0.8)
    }

    fn body_sample(truth: &UnitQuaternion<f64>) -> Sample {
        Sample::new(
            Vector3::zeros(),
            truth.conjugate().rotate_vec(&Vector3::z()),
            truth.conjugate().rotate_vec(&field()),
            0.01,
        )
    }

    #[test]
    fn test_calculate_pose_level_north() {
        let core = FusionCore::new(&FusionSettings::default());
        let pose = core.calculate_pose(&body_sample(&UnitQuaternion::identity()));
        assert!(pose.euler.norm() < EPSILON);
        assert!(pose.quaternion.angle() < EPSILON);
    }

    #[test]
    fn test_calculate_pose_recovers_attitude() {
        let core = FusionCore::new(&FusionSettings::default());
        let truth = UnitQuaternion::from_euler_degrees(-25.0, 15.0, 135.0);
        let pose = core.calculate_pose(&body_sample(&truth));
        let degrees = pose.euler.rad_to_deg();
        assert!((degrees.x + 25.0).abs() < 1e-6, "roll = {}", degrees.x);
        assert!((degrees.y - 15.0).abs() < 1e-6, "pitch = {}", degrees.y);
        assert!((degrees.z - 135.0).abs() < 1e-6, "yaw = {}", degrees.z);
    }

    #[test]
    fn test_compass_disabled_carries_yaw() {
        let mut core = FusionCore::new(&FusionSettings::default());
        core.publish(UnitQuaternion::from_euler_degrees(0.0, 0.0, 70.0));
        core.enable_compass = false;

        let truth = UnitQuaternion::from_euler_degrees(5.0, 0.0, -20.0);
        let pose = core.calculate_pose(&body_sample(&truth));
        assert!((pose.roll().to_degrees() - 5.0).abs() < 1e-6);
        assert!((pose.yaw().to_degrees() - 70.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_compass_carries_yaw() {
        let mut core = FusionCore::new(&FusionSettings::default());
        core.publish(UnitQuaternion::from_euler_degrees(0.0, 0.0, -40.0));

        let sample = body_sample(&UnitQuaternion::identity()).with_compass_invalid();
        let pose = core.calculate_pose(&sample);
        assert!((pose.yaw().to_degrees() + 40.0).abs() < 1e-6);

        let mut zero_field = body_sample(&UnitQuaternion::identity());
        zero_field.compass = Vector3::zeros();
        let pose = core.calculate_pose(&zero_field);
        assert!((pose.yaw().to_degrees() + 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_accel_unusable_carries_tilt() {
        let mut core = FusionCore::new(&FusionSettings::default());
        core.publish(UnitQuaternion::from_euler_degrees(12.0, -8.0, 0.0));

        let mut sample = body_sample(&UnitQuaternion::identity());
        sample.accel = Vector3::zeros();
        let pose = core.calculate_pose(&sample);
        assert!((pose.roll().to_degrees() - 12.0).abs() < 1e-6);
        assert!((pose.pitch().to_degrees() + 8.0).abs() < 1e-6);

        core.enable_accel = false;
        let pose = core.calculate_pose(&body_sample(&UnitQuaternion::identity()));
        assert!((pose.roll().to_degrees() - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_measured_sign_follows_fused() {
        let mut core = FusionCore::new(&FusionSettings::default());
        let fused = UnitQuaternion::from_euler_degrees(0.0, 0.0, 179.0);
        core.publish(fused);

        let truth = UnitQuaternion::from_euler_degrees(0.0, 0.0, -179.0);
        let pose = core.calculate_pose(&body_sample(&truth));
        assert!(pose.quaternion.coords.dot(&fused.coords) > 0.0);
        assert!(pose.quaternion.angle_to(&truth) < 1e-6);
        assert!((pose.euler - pose.quaternion.to_euler()).norm() < 1e-9);
    }

    #[test]
    fn test_declination_subtracted_from_heading() {
        let settings = FusionSettings {
            magnetic_declination: 0.1,
            ..Default::default()
        };
        let core = FusionCore::new(&settings);
        let pose = core.calculate_pose(&body_sample(&UnitQuaternion::identity()));
        assert!((pose.yaw() + 0.1).abs() < EPSILON);
    }

    #[test]
    fn test_accel_residuals() {
        let mut core = FusionCore::new(&FusionSettings::default());
        let q = UnitQuaternion::from_euler_degrees(30.0, -20.0, 45.0);
        core.publish(q);

        let gravity = q.conjugate().rotate_vec(&Vector3::z());
        assert!(core.accel_residuals(&gravity).norm() < EPSILON);

        let push = Vector3::new(0.2, 0.0, 0.0);
        assert!((core.accel_residuals(&(gravity + push)) + push).norm() < EPSILON);
    }

    #[test]
    fn test_accel_global_frame() {
        let mut core = FusionCore::new(&FusionSettings::default());
        let q = UnitQuaternion::from_euler_degrees(-10.0, 35.0, 200.0);
        core.publish(q);

        let gravity = q.conjugate().rotate_vec(&Vector3::z());
        assert!((core.accel_global_frame(&gravity) - Vector3::z()).norm() < EPSILON);
    }

    #[test]
    fn test_reset_keeps_policy() {
        let settings = FusionSettings {
            enable_compass: false,
            magnetic_declination: 0.3,
            ..Default::default()
        };
        let mut core = FusionCore::new(&settings);
        core.count_sample();
        core.publish(UnitQuaternion::from_euler_degrees(1.0, 2.0, 3.0));
        core.reset();

        assert!(core.is_first_time());
        assert_eq!(core.sample_number(), 0);
        assert_eq!(*core.fusion_pose(), Pose::identity());
        assert!(!core.enable_compass);
        assert_eq!(core.magnetic_declination, 0.3);
    }
}
