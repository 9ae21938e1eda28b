//! rtfusion - quaternion attitude and heading reference filters
//!
//! Fuses gyroscope, accelerometer and magnetometer samples into an
//! orientation estimate. Several fusion algorithms share one engine: each
//! cycle derives a *measured* pose from accelerometer and compass alone,
//! then the selected algorithm predicts with the gyro and corrects towards
//! that measurement.
//!
//! # Features
//!
//! - RTQF: quaternion complementary filter with slerp correction (default)
//! - Four-state quaternion Kalman filter
//! - Madgwick gradient-descent and Mahony PI filters
//! - Per-sensor enables and validity flags, magnetic declination
//! - Gravity-removed and world-frame acceleration
//! - Optional `serde` support for [`FusionSettings`] and [`FusionKind`]
//!
//! # Conventions
//!
//! Euler vectors are `(roll, pitch, yaw)` in radians, applied in ZYX order.
//! Quaternions rotate body-frame vectors into the world frame; a level,
//! stationary accelerometer reads `(0, 0, 1)` g. Angles in degrees are
//! converted at the edge with [`DEG_TO_RAD`] and [`RAD_TO_DEG`].
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::Vector3;
//! use rtfusion::{Ahrs, Sample};
//!
//! let mut ahrs = Ahrs::new();
//!
//! // Sensor readings
//! let gyroscope = Vector3::new(0.0, 0.0, 0.1);       // rad/s
//! let accelerometer = Vector3::new(0.0, 0.0, 1.0);   // g
//! let magnetometer = Vector3::new(20.0, 0.0, -40.0); // uT
//!
//! // Update AHRS
//! let pose = ahrs.update(&Sample::new(gyroscope, accelerometer, magnetometer, 0.01));
//!
//! // Euler angles (roll, pitch, yaw) in radians
//! let (roll, pitch, yaw) = (pose.roll(), pose.pitch(), pose.yaw());
//! assert!(roll.abs() < 1e-9 && pitch.abs() < 1e-9 && yaw.abs() < 1e-9);
//! ```

mod ahrs;
mod engine;
mod error;
pub mod fusion;
pub mod kalman;
pub mod madgwick;
pub mod mahony;
mod math;
pub mod rtqf;
mod types;

// Re-export all public types and functions
pub use ahrs::Ahrs;
pub use engine::FusionCore;
pub use error::{FusionError, FusionResult, Sensor};
pub use fusion::{Fusion, FusionFilter, Measurement, NullFusion};
pub use kalman::KalmanState4;
pub use madgwick::Madgwick;
pub use mahony::Mahony;
pub use math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, Vector3Ext, try_unit_quaternion, wrap_angle};
pub use rtqf::{DEFAULT_SLERP_POWER, Rtqf};
pub use types::*;
