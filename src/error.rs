//! Error types for the fusion engine
//!
//! Nothing in here is fatal: degenerate inputs and missing sensors are
//! recovered where they occur, and only configuration errors are handed
//! back to the caller.

use core::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type FusionResult<T> = Result<T, FusionError>;

/// The three inertial sensors a [`Sample`](crate::Sample) carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    Gyro,
    Accel,
    Compass,
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sensor::Gyro => "gyroscope",
            Sensor::Accel => "accelerometer",
            Sensor::Compass => "compass",
        };
        f.write_str(name)
    }
}

/// Errors raised by the fusion engine
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FusionError {
    /// Normalization of a zero-magnitude vector or quaternion
    #[error("cannot normalize a zero-magnitude value")]
    DegenerateInput,

    /// Sensor marked invalid in the current sample
    #[error("{0} reading is not valid for this sample")]
    SensorUnavailable(Sensor),

    /// Gain or tuning constant outside its legal range
    #[error("{name} = {value} is out of range")]
    MisconfiguredGain { name: &'static str, value: f64 },

    /// Sample delivered with a non-positive or non-finite time delta
    #[error("time delta {0} s must be positive")]
    InvalidTimeDelta(f64),
}
