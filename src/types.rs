//! Core types and configuration for the fusion engine

use core::fmt;
use core::str::FromStr;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::error::{FusionError, FusionResult, Sensor};
use crate::math::QuaternionExt;

/// Fusion algorithm selector
///
/// Each variant carries a stable numeric code and display name so that a
/// configuration can refer to an algorithm by either.
///
/// # Example
/// ```
/// use rtfusion::FusionKind;
///
/// assert_eq!(FusionKind::Rtqf.name(), "RTQF");
/// assert_eq!(FusionKind::from_code(3), Some(FusionKind::Madgwick));
/// assert_eq!("mahony".parse::<FusionKind>(), Ok(FusionKind::Mahony));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FusionKind {
    /// No recursive filtering, publishes the measured pose
    Null,
    /// Four-state quaternion Kalman filter
    KalmanState4,
    /// Quaternion complementary filter with slerp correction
    #[default]
    Rtqf,
    /// Madgwick gradient-descent filter
    Madgwick,
    /// Mahony proportional-integral filter
    Mahony,
}

impl FusionKind {
    /// Every variant, ordered by code
    pub const ALL: [FusionKind; 5] = [
        FusionKind::Null,
        FusionKind::KalmanState4,
        FusionKind::Rtqf,
        FusionKind::Madgwick,
        FusionKind::Mahony,
    ];

    /// Display name of the algorithm
    pub const fn name(self) -> &'static str {
        match self {
            FusionKind::Null => "NULL",
            FusionKind::KalmanState4 => "Kalman STATE4",
            FusionKind::Rtqf => "RTQF",
            FusionKind::Madgwick => "Madgwick",
            FusionKind::Mahony => "Mahony",
        }
    }

    /// Stable numeric type code
    pub const fn code(self) -> u8 {
        match self {
            FusionKind::Null => 0,
            FusionKind::KalmanState4 => 1,
            FusionKind::Rtqf => 2,
            FusionKind::Madgwick => 3,
            FusionKind::Mahony => 4,
        }
    }

    /// Look up a variant by its numeric type code
    pub fn from_code(code: u8) -> Option<FusionKind> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for FusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown fusion name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown fusion algorithm '{0}'")]
pub struct UnknownFusionKind(pub String);

impl FromStr for FusionKind {
    type Err = UnknownFusionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownFusionKind(wanted.to_string()))
    }
}

/// Fusion engine settings
///
/// Operator policy (sensor enables, declination) plus the tuning
/// constants of every fusion variant. Only the constants belonging to the
/// selected `kind` are used.
///
/// # Example
/// ```
/// use rtfusion::{Ahrs, FusionKind, FusionSettings};
///
/// let settings = FusionSettings {
///     kind: FusionKind::Rtqf,
///     slerp_power: 0.05,          // faster correction towards accel/compass
///     enable_compass: false,      // gyro + accel only
///     ..Default::default()
/// };
/// let ahrs = Ahrs::with_settings(settings).unwrap();
/// assert_eq!(ahrs.fusion_name(), "RTQF");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FusionSettings {
    /// Fusion algorithm to run
    pub kind: FusionKind,
    /// Integrate the gyroscope in the predict step
    pub enable_gyro: bool,
    /// Derive roll and pitch from the accelerometer
    pub enable_accel: bool,
    /// Derive heading from the compass
    pub enable_compass: bool,
    /// Magnetic declination in radians, subtracted from the compass heading
    pub magnetic_declination: f64,
    /// RTQF correction gain in `[0, 1]`
    ///
    /// 0 ignores the measurement (pure gyro integration), 1 snaps the
    /// state onto the measurement every cycle.
    pub slerp_power: f64,
    /// Madgwick gradient-descent step gain
    pub madgwick_beta: f64,
    /// Mahony proportional gain
    pub mahony_kp: f64,
    /// Mahony integral gain
    pub mahony_ki: f64,
    /// Kalman process noise (diagonal)
    pub kalman_q: f64,
    /// Kalman observation noise (diagonal)
    pub kalman_r: f64,
    /// Log and expose intermediate quantities every cycle
    pub debug: bool,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            kind: FusionKind::default(),
            enable_gyro: true,
            enable_accel: true,
            enable_compass: true,
            magnetic_declination: 0.0,
            slerp_power: 0.02,
            madgwick_beta: 0.1,
            mahony_kp: 1.0,
            mahony_ki: 0.0,
            kalman_q: 0.001,
            kalman_r: 0.0005,
            debug: false,
        }
    }
}

impl FusionSettings {
    /// Check every tuning constant is within its legal range
    pub fn validate(&self) -> FusionResult<()> {
        check_slerp_power(self.slerp_power)?;
        check_gain("magnetic_declination", self.magnetic_declination, |v| v.is_finite())?;
        check_gain("madgwick_beta", self.madgwick_beta, |v| v >= 0.0)?;
        check_gain("mahony_kp", self.mahony_kp, |v| v >= 0.0)?;
        check_gain("mahony_ki", self.mahony_ki, |v| v >= 0.0)?;
        check_gain("kalman_q", self.kalman_q, |v| v > 0.0)?;
        check_gain("kalman_r", self.kalman_r, |v| v > 0.0)?;
        Ok(())
    }
}

pub(crate) fn check_slerp_power(value: f64) -> FusionResult<()> {
    check_gain("slerp_power", value, |v| (0.0..=1.0).contains(&v))
}

pub(crate) fn check_gain(name: &'static str, value: f64, valid: impl Fn(f64) -> bool) -> FusionResult<()> {
    if value.is_finite() && valid(value) {
        Ok(())
    } else {
        Err(FusionError::MisconfiguredGain { name, value })
    }
}

/// One timestamped reading bundle from the driver layer
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use rtfusion::Sample;
///
/// let sample = Sample::new(
///     Vector3::new(0.0, 0.0, 0.1),   // rad/s
///     Vector3::new(0.0, 0.0, 1.0),   // g
///     Vector3::new(20.0, 0.0, -40.0), // uT
///     0.01,                          // s since previous sample
/// )
/// .with_compass_invalid();
/// assert!(sample.compass().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Angular rate in rad/s
    pub gyro: Vector3<f64>,
    pub gyro_valid: bool,
    /// Specific force in g, +z when level
    pub accel: Vector3<f64>,
    pub accel_valid: bool,
    /// Magnetic field in uT
    pub compass: Vector3<f64>,
    pub compass_valid: bool,
    /// Seconds elapsed since the previous sample
    pub time_delta: f64,
}

impl Sample {
    /// Sample with every sensor marked valid
    pub fn new(
        gyro: Vector3<f64>,
        accel: Vector3<f64>,
        compass: Vector3<f64>,
        time_delta: f64,
    ) -> Self {
        Self {
            gyro,
            gyro_valid: true,
            accel,
            accel_valid: true,
            compass,
            compass_valid: true,
            time_delta,
        }
    }

    pub fn with_gyro_invalid(mut self) -> Self {
        self.gyro_valid = false;
        self
    }

    pub fn with_accel_invalid(mut self) -> Self {
        self.accel_valid = false;
        self
    }

    pub fn with_compass_invalid(mut self) -> Self {
        self.compass_valid = false;
        self
    }

    /// Gyroscope reading, if valid
    pub fn gyro(&self) -> FusionResult<Vector3<f64>> {
        valid_reading(self.gyro, self.gyro_valid, Sensor::Gyro)
    }

    /// Accelerometer reading, if valid
    pub fn accel(&self) -> FusionResult<Vector3<f64>> {
        valid_reading(self.accel, self.accel_valid, Sensor::Accel)
    }

    /// Compass reading, if valid
    pub fn compass(&self) -> FusionResult<Vector3<f64>> {
        valid_reading(self.compass, self.compass_valid, Sensor::Compass)
    }
}

fn valid_reading(reading: Vector3<f64>, valid: bool, sensor: Sensor) -> FusionResult<Vector3<f64>> {
    if valid {
        Ok(reading)
    } else {
        Err(FusionError::SensorUnavailable(sensor))
    }
}

/// An orientation as both Euler angles and unit quaternion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// `(roll, pitch, yaw)` in radians
    pub euler: Vector3<f64>,
    pub quaternion: UnitQuaternion<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            euler: Vector3::zeros(),
            quaternion: UnitQuaternion::identity(),
        }
    }

    /// Pose whose Euler angles are derived from `quaternion`
    pub fn from_quaternion(quaternion: UnitQuaternion<f64>) -> Self {
        Self {
            euler: quaternion.to_euler(),
            quaternion,
        }
    }

    pub fn roll(&self) -> f64 {
        self.euler.x
    }

    pub fn pitch(&self) -> f64 {
        self.euler.y
    }

    pub fn yaw(&self) -> f64 {
        self.euler.z
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Intermediate quantities of the latest cycle, available in debug mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    /// Samples delivered since the last reset
    pub sample_number: u64,
    /// Pose derived from accel and compass alone
    pub measured: Pose,
    /// Variant-specific mismatch between prediction and measurement
    ///
    /// The rotation delta for RTQF, the state error for the Kalman filter.
    pub correction: Option<Quaternion<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fusion_kind_table() {
        for (code, kind) in FusionKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.code() as usize, code);
            assert_eq!(FusionKind::from_code(code as u8), Some(kind));
            assert_eq!(kind.name().parse::<FusionKind>(), Ok(kind));
        }
        assert_eq!(FusionKind::from_code(5), None);
        assert_eq!(" kalman state4 ".parse::<FusionKind>(), Ok(FusionKind::KalmanState4));
        let unknown = "kalman".parse::<FusionKind>().unwrap_err();
        assert_eq!(unknown, UnknownFusionKind("kalman".to_string()));
        assert_eq!(unknown.to_string(), "unknown fusion algorithm 'kalman'");
        assert_eq!(FusionKind::Madgwick.to_string(), "Madgwick");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = FusionSettings::default();
        assert_eq!(settings.kind, FusionKind::Rtqf);
        assert_eq!(settings.slerp_power, 0.02);
        assert!(settings.enable_gyro && settings.enable_accel && settings.enable_compass);
        assert!(!settings.debug);
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn test_settings_validation() {
        let bad = FusionSettings {
            slerp_power: 1.01,
            ..Default::default()
        };
        assert_eq!(
            bad.validate(),
            Err(FusionError::MisconfiguredGain {
                name: "slerp_power",
                value: 1.01
            })
        );

        let nan = FusionSettings {
            slerp_power: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());

        let bad_kalman = FusionSettings {
            kalman_r: 0.0,
            ..Default::default()
        };
        assert!(bad_kalman.validate().is_err());

        let edges = FusionSettings {
            slerp_power: 1.0,
            mahony_ki: 0.0,
            ..Default::default()
        };
        assert_eq!(edges.validate(), Ok(()));
    }

    #[test]
    fn test_sample_validity() {
        let sample = Sample::new(
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.0),
            0.01,
        );
        assert_eq!(sample.gyro(), Ok(Vector3::new(0.1, 0.0, 0.0)));

        let sample = sample.with_accel_invalid().with_gyro_invalid();
        assert_eq!(sample.accel(), Err(FusionError::SensorUnavailable(Sensor::Accel)));
        assert_eq!(sample.gyro(), Err(FusionError::SensorUnavailable(Sensor::Gyro)));
        assert!(sample.compass().is_ok());
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let settings = FusionSettings {
            kind: FusionKind::KalmanState4,
            enable_compass: false,
            magnetic_declination: -0.21,
            kalman_q: 0.004,
            debug: true,
            ..Default::default()
        };

        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(settings).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let decoded: FusionSettings = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let text = "kind,slerp_power\nMadgwick,0.05\n";
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let decoded: FusionSettings = reader.deserialize().next().unwrap().unwrap();

        assert_eq!(
            decoded,
            FusionSettings {
                kind: FusionKind::Madgwick,
                slerp_power: 0.05,
                ..Default::default()
            }
        );
    }
}
