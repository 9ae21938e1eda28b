//! Fusion engine handle driving the selected variant once per sample

use log::{debug, info, warn};
use nalgebra::{UnitQuaternion, Vector3};

use crate::engine::FusionCore;
use crate::error::{FusionError, FusionResult};
use crate::fusion::{Fusion, FusionFilter, Measurement};
use crate::rtqf::Rtqf;
use crate::types::{Diagnostics, FusionKind, FusionSettings, Pose, Sample, check_slerp_power};

/// Attitude and heading reference system
///
/// Owns the shared fusion state and one fusion variant. Every call to
/// [`Ahrs::update`] runs one complete cycle and returns the new fused pose.
/// The first sample after construction or [`Ahrs::reset`] seeds the
/// estimate from the measured pose rather than filtering.
#[derive(Debug, Clone)]
pub struct Ahrs {
    settings: FusionSettings,
    core: FusionCore,
    filter: Fusion,
}

impl Ahrs {
    /// Create an engine running RTQF with default settings
    pub fn new() -> Self {
        let settings = FusionSettings::default();
        Self {
            settings,
            core: FusionCore::new(&settings),
            filter: Fusion::Rtqf(Rtqf::new()),
        }
    }

    /// Create an engine with the specified settings
    ///
    /// Fails with [`FusionError::MisconfiguredGain`] when a tuning constant
    /// is out of range.
    pub fn with_settings(settings: FusionSettings) -> FusionResult<Self> {
        settings.validate().inspect_err(|err| warn!("rejected fusion settings: {err}"))?;
        let filter = Fusion::new(&settings)?;
        info!("fusion engine created with {}", settings.kind);
        Ok(Self {
            settings,
            core: FusionCore::new(&settings),
            filter,
        })
    }

    pub fn settings(&self) -> FusionSettings {
        self.settings
    }

    /// Replace the settings
    ///
    /// Selecting a different algorithm swaps the variant and restarts the
    /// session from the next sample; otherwise the running state is kept.
    /// Invalid settings are rejected and leave the engine untouched.
    pub fn set_settings(&mut self, settings: FusionSettings) -> FusionResult<()> {
        settings.validate().inspect_err(|err| warn!("rejected fusion settings: {err}"))?;
        if settings.kind != self.filter.kind() {
            let filter = Fusion::new(&settings)?;
            info!("switching fusion from {} to {}", self.filter.kind(), settings.kind);
            self.filter = filter;
            self.core.reset();
        } else {
            self.filter.configure(&settings)?;
        }
        self.core.configure(&settings);
        self.settings = settings;
        Ok(())
    }

    /// Run one fusion cycle for `sample` and return the fused pose
    ///
    /// A sample with a non-positive or non-finite time delta is dropped
    /// (after bootstrap) and the previous pose returned unchanged.
    pub fn update(&mut self, sample: &Sample) -> &Pose {
        let sample_number = self.core.count_sample();

        if self.core.is_first_time() {
            let measured = self.core.calculate_pose(sample);
            self.filter.initialise(&measured);
            self.core.record_measurement(sample, measured);
            self.core.publish(self.filter.orientation());
            debug!(
                "{} bootstrapped at sample {sample_number}: {:?}",
                self.filter.kind(),
                self.core.fusion_pose().euler
            );
            return self.core.fusion_pose();
        }

        let time_delta = sample.time_delta;
        if !(time_delta.is_finite() && time_delta > 0.0) {
            warn!("dropping sample {sample_number}: {}", FusionError::InvalidTimeDelta(time_delta));
            return self.core.fusion_pose();
        }

        let measured = self.core.calculate_pose(sample);
        self.filter.predict(self.core.gyro_input(sample), time_delta);
        self.filter.update(&Measurement {
            pose: &measured,
            accel: self.core.accel_input(sample),
            compass: self.core.compass_input(sample),
            declination: self.core.magnetic_declination,
            time_delta,
        });
        self.core.record_measurement(sample, measured);
        self.core.publish(self.filter.orientation());

        if self.core.debug {
            debug!(
                "sample {sample_number}: measured {:?} fused {:?} correction {:?}",
                self.core.measured_pose().euler,
                self.core.fusion_pose().euler,
                self.filter.correction()
            );
        }
        self.core.fusion_pose()
    }

    /// Restart the session, keeping every setting
    pub fn reset(&mut self) {
        self.filter.reset();
        self.core.reset();
        info!("{} fusion reset", self.filter.kind());
    }

    pub fn fusion_kind(&self) -> FusionKind {
        self.filter.kind()
    }

    pub fn fusion_name(&self) -> &'static str {
        self.filter.kind().name()
    }

    /// Samples delivered since construction or the last reset
    pub fn sample_number(&self) -> u64 {
        self.core.sample_number()
    }

    /// Latest fused pose
    pub fn pose(&self) -> &Pose {
        self.core.fusion_pose()
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.core.fusion_pose().quaternion
    }

    /// Latest pose derived from accelerometer and compass alone
    pub fn measured_pose(&self) -> &Pose {
        self.core.measured_pose()
    }

    /// Whether the compass reading of the latest sample was valid
    pub fn compass_valid(&self) -> bool {
        self.core.compass_valid()
    }

    /// Shared fusion state, including the measurement functions
    pub fn core(&self) -> &FusionCore {
        &self.core
    }

    /// The running fusion variant
    pub fn filter(&self) -> &Fusion {
        &self.filter
    }

    /// Body-frame acceleration with gravity removed, see [`FusionCore::accel_residuals`]
    pub fn accel_residuals(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        self.core.accel_residuals(accel)
    }

    /// Acceleration rotated into the world frame, see [`FusionCore::accel_global_frame`]
    pub fn accel_global_frame(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        self.core.accel_global_frame(accel)
    }

    pub fn set_gyro_enable(&mut self, enable: bool) {
        self.settings.enable_gyro = enable;
        self.core.enable_gyro = enable;
    }

    pub fn set_accel_enable(&mut self, enable: bool) {
        self.settings.enable_accel = enable;
        self.core.enable_accel = enable;
    }

    pub fn set_compass_enable(&mut self, enable: bool) {
        self.settings.enable_compass = enable;
        self.core.enable_compass = enable;
    }

    /// Set the magnetic declination in radians
    pub fn set_magnetic_declination(&mut self, declination: f64) -> FusionResult<()> {
        if !declination.is_finite() {
            let err = FusionError::MisconfiguredGain {
                name: "magnetic_declination",
                value: declination,
            };
            warn!("{err}");
            return Err(err);
        }
        self.settings.magnetic_declination = declination;
        self.core.magnetic_declination = declination;
        Ok(())
    }

    /// Set the RTQF correction gain; values outside `[0, 1]` are rejected
    pub fn set_slerp_power(&mut self, slerp_power: f64) -> FusionResult<()> {
        check_slerp_power(slerp_power).inspect_err(|err| warn!("{err}"))?;
        self.settings.slerp_power = slerp_power;
        self.filter.configure(&self.settings)
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.settings.debug = debug;
        self.core.debug = debug;
    }

    /// Intermediate quantities of the latest cycle, only in debug mode
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.core.debug.then(|| Diagnostics {
            sample_number: self.core.sample_number(),
            measured: *self.core.measured_pose(),
            correction: self.filter.correction(),
        })
    }
}

impl Default for Ahrs {
    fn default() -> Self {
        Self::new()
    }
}
