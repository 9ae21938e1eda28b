//! Mathematical utilities and nalgebra extensions for the fusion engine
//!
//! Euler angles are carried in a `Vector3<f64>` as `(roll, pitch, yaw)`
//! in radians, with the aerospace Z-Y-X rotation order. Orientation
//! quaternions rotate body-frame vectors into the world frame.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::{FusionError, FusionResult};

/// Mathematical constants
pub const DEG_TO_RAD: f64 = core::f64::consts::PI / 180.0;
pub const RAD_TO_DEG: f64 = 180.0 / core::f64::consts::PI;

/// Norms at or below this are treated as zero
const NORM_EPSILON: f64 = 1e-12;

/// Wrap an angle into `[-PI, PI]`
pub fn wrap_angle(angle: f64) -> f64 {
    use core::f64::consts::{PI, TAU};

    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI && angle > 0.0 { PI } else { wrapped }
}

/// Normalize a raw quaternion into a rotation
///
/// Fails with [`FusionError::DegenerateInput`] for a zero quaternion.
pub fn try_unit_quaternion(q: Quaternion<f64>) -> FusionResult<UnitQuaternion<f64>> {
    UnitQuaternion::try_new(q, NORM_EPSILON).ok_or(FusionError::DegenerateInput)
}

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Normalize the vector, failing on a zero vector instead of producing NaN
    fn try_unit(&self) -> FusionResult<Vector3<f64>>;

    /// Roll and pitch implied by a gravity (accelerometer) reading, yaw = 0
    fn accel_to_euler(&self) -> FusionResult<Vector3<f64>>;

    /// Convert degrees to radians
    fn deg_to_rad(&self) -> Vector3<f64>;

    /// Convert radians to degrees
    fn rad_to_deg(&self) -> Vector3<f64>;
}

impl Vector3Ext for Vector3<f64> {
    fn try_unit(&self) -> FusionResult<Vector3<f64>> {
        self.try_normalize(NORM_EPSILON)
            .ok_or(FusionError::DegenerateInput)
    }

    fn accel_to_euler(&self) -> FusionResult<Vector3<f64>> {
        let a = self.try_unit()?;
        let roll = a.y.atan2(a.z);
        let pitch = -a.x.atan2((a.y * a.y + a.z * a.z).sqrt());
        Ok(Vector3::new(roll, pitch, 0.0))
    }

    fn deg_to_rad(&self) -> Vector3<f64> {
        *self * DEG_TO_RAD
    }

    fn rad_to_deg(&self) -> Vector3<f64> {
        *self * RAD_TO_DEG
    }
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt: Sized {
    /// Convert quaternion to Euler angles (roll, pitch, yaw) in radians
    fn to_euler(&self) -> Vector3<f64>;

    /// Convert quaternion to Euler angles in degrees
    fn to_euler_degrees(&self) -> Vector3<f64>;

    /// Create quaternion from Euler angles `(roll, pitch, yaw)` in radians
    fn from_euler(euler: &Vector3<f64>) -> Self;

    /// Create quaternion from Euler angles in degrees
    fn from_euler_degrees(roll: f64, pitch: f64, yaw: f64) -> Self;

    /// Rotate `v` as `q * (0, v) * conjugate(q)`
    fn rotate_vec(&self, v: &Vector3<f64>) -> Vector3<f64>;

    /// Components in `(scalar, x, y, z)` order
    fn components(&self) -> [f64; 4];

    /// Index into [`components`](Self::components) of the largest magnitude
    fn dominant_component(&self) -> usize;

    /// The same rotation with all four components negated
    fn negated(&self) -> Self;

    /// Flip sign if the dominant component disagrees in sign with `reference`
    ///
    /// Returns the (possibly negated) quaternion and whether a flip happened.
    fn aligned_to(&self, reference: &Self) -> (Self, bool);
}

impl QuaternionExt for UnitQuaternion<f64> {
    fn to_euler(&self) -> Vector3<f64> {
        let (roll, pitch, yaw) = self.euler_angles();
        Vector3::new(roll, pitch, yaw)
    }

    fn to_euler_degrees(&self) -> Vector3<f64> {
        self.to_euler().rad_to_deg()
    }

    fn from_euler(euler: &Vector3<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z)
    }

    fn from_euler_degrees(roll: f64, pitch: f64, yaw: f64) -> UnitQuaternion<f64> {
        let euler_rad = Vector3::new(roll, pitch, yaw).deg_to_rad();
        Self::from_euler(&euler_rad)
    }

    fn rotate_vec(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let q = self.quaternion();
        (q * Quaternion::from_imag(*v) * q.conjugate()).imag()
    }

    fn components(&self) -> [f64; 4] {
        let q = self.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    fn dominant_component(&self) -> usize {
        let components = self.components();
        let mut max_index = 0;
        for i in 1..components.len() {
            if components[i].abs() > components[max_index].abs() {
                max_index = i;
            }
        }
        max_index
    }

    fn negated(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::new_unchecked(-self.into_inner())
    }

    fn aligned_to(&self, reference: &UnitQuaternion<f64>) -> (UnitQuaternion<f64>, bool) {
        let index = self.dominant_component();
        if self.components()[index] * reference.components()[index] < 0.0 {
            (self.negated(), true)
        } else {
            (*self, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_try_unit() {
        let v = Vector3::<f64>::new(3.0, 4.0, 0.0);
        let unit = v.try_unit().unwrap();
        assert!((unit.norm() - 1.0).abs() < EPSILON);
        assert!((unit.x - 0.6).abs() < EPSILON);

        assert_eq!(
            Vector3::<f64>::zeros().try_unit(),
            Err(FusionError::DegenerateInput)
        );
        assert_eq!(
            try_unit_quaternion(Quaternion::new(0.0, 0.0, 0.0, 0.0)),
            Err(FusionError::DegenerateInput)
        );
    }

    #[test]
    fn test_accel_to_euler() {
        let level = Vector3::<f64>::new(0.0, 0.0, 1.0).accel_to_euler().unwrap();
        assert!(level.norm() < EPSILON);

        // 30 degree pitch: gravity (up) leans towards -x in the body frame
        let pitch = 30.0 * DEG_TO_RAD;
        let accel = Vector3::new(-pitch.sin(), 0.0, pitch.cos());
        let euler = accel.accel_to_euler().unwrap();
        assert!((euler.y - pitch).abs() < EPSILON);
        assert!(euler.x.abs() < EPSILON);

        // Roll and pitch recovered from the gravity a rotation implies
        let q = UnitQuaternion::from_euler_degrees(20.0, -15.0, 70.0);
        let accel = q.conjugate().rotate_vec(&Vector3::z());
        let euler = accel.accel_to_euler().unwrap().rad_to_deg();
        assert!((euler.x - 20.0).abs() < 1e-6);
        assert!((euler.y + 15.0).abs() < 1e-6);
        assert_eq!(euler.z, 0.0);

        assert_eq!(
            Vector3::<f64>::zeros().accel_to_euler(),
            Err(FusionError::DegenerateInput)
        );
    }

    #[test]
    fn test_rotate_vec_matches_nalgebra() {
        let q = UnitQuaternion::from_euler_degrees(10.0, 40.0, -120.0);
        let v = Vector3::new(0.3, -1.2, 2.5);
        assert!((q.rotate_vec(&v) - q * v).norm() < EPSILON);
    }

    #[test]
    fn test_quaternion_euler_conversion() {
        let euler = Vector3::new(30.0, 45.0, 60.0);
        let quat = UnitQuaternion::from_euler_degrees(euler.x, euler.y, euler.z);
        let recovered = quat.to_euler_degrees();

        assert!((euler - recovered).norm() < 1e-9);
    }

    #[test]
    fn test_sign_alignment() {
        let q = UnitQuaternion::from_euler_degrees(0.0, 0.0, 179.0);
        assert_eq!(q.dominant_component(), 3);

        let (same, flipped) = q.aligned_to(&q);
        assert!(!flipped);
        assert_eq!(same, q);

        let (aligned, flipped) = q.negated().aligned_to(&q);
        assert!(flipped);
        assert!((aligned.into_inner() - q.into_inner()).norm() < EPSILON);
    }

    #[test]
    fn test_wrap_angle() {
        use core::f64::consts::PI;

        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < EPSILON);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < EPSILON);
        assert!((wrap_angle(0.25) - 0.25).abs() < EPSILON);
        assert_eq!(wrap_angle(PI), PI);
    }
}
