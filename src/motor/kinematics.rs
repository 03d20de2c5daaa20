// Trapezoidal velocity-profile kinematics.
//
// Pure computation, no I/O: predicts how long a move takes and where the
// shaft is mid-move from the configured ramp rates. The controller runs the
// same profile internally but never reports progress, so callers that need
// position-over-time have to compute it host-side.

use thiserror::Error;

use crate::config::MotorSettings;

/// Precondition violations of the profile formulas. These are caller
/// errors, distinct from the boolean soft-failures of the command link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KinematicsError {
    /// The duration/position formulas assume the move starts from rest.
    #[error("profile formulas assume a zero initial velocity (VI = {0})")]
    NonzeroInitialVelocity(u32),

    /// Ramp rates are divided by; zero is not a profile.
    #[error("acceleration and deceleration must be positive (A = {acceleration}, D = {deceleration})")]
    ZeroRamp { acceleration: u32, deceleration: u32 },

    /// A zero cruise velocity never finishes any displacement.
    #[error("maximum velocity must be positive")]
    ZeroMaximumVelocity,

    /// Position interpolation is only defined when the profile has a
    /// cruise phase.
    #[error("profile never reaches maximum velocity")]
    NoCruisePhase,
}

/// Signed encoder displacement for an angle in degrees.
pub fn angle_to_counts(angle_degrees: f64, counts_per_rotation: u32) -> i64 {
    (angle_degrees * f64::from(counts_per_rotation) / 360.0).ceil() as i64
}

/// Velocity profile for one move, in encoder counts and milliseconds.
///
/// Computed on demand from the current settings and a requested angle;
/// nothing here is stored on the driver.
#[derive(Debug, Clone, Copy)]
pub struct MotionProfile {
    /// Total displacement, absolute value.
    pub counts: f64,
    /// Counts and time spent accelerating to cruise velocity.
    pub ramp_up_counts: f64,
    pub ramp_up_ms: f64,
    /// Counts and time spent decelerating back to rest.
    pub ramp_down_counts: f64,
    pub ramp_down_ms: f64,
    /// Whether the displacement is long enough to reach cruise velocity.
    pub reaches_cruise: bool,
    /// Total move duration.
    pub total_ms: f64,
    acceleration: f64,
    deceleration: f64,
    maximum_velocity: f64,
    counts_per_rotation: f64,
}

impl MotionProfile {
    pub fn plan(
        settings: &MotorSettings,
        counts_per_rotation: u32,
        angle_degrees: f64,
    ) -> Result<Self, KinematicsError> {
        if settings.initial_velocity != 0 {
            return Err(KinematicsError::NonzeroInitialVelocity(
                settings.initial_velocity,
            ));
        }
        if settings.acceleration == 0 || settings.deceleration == 0 {
            return Err(KinematicsError::ZeroRamp {
                acceleration: settings.acceleration,
                deceleration: settings.deceleration,
            });
        }
        if settings.maximum_velocity == 0 {
            return Err(KinematicsError::ZeroMaximumVelocity);
        }

        let acceleration = f64::from(settings.acceleration);
        let deceleration = f64::from(settings.deceleration);
        let maximum_velocity = f64::from(settings.maximum_velocity);
        let counts = angle_to_counts(angle_degrees, counts_per_rotation).unsigned_abs() as f64;

        let ramp_up_counts = 0.5 * maximum_velocity * maximum_velocity / acceleration;
        let ramp_down_counts = 0.5 * maximum_velocity * maximum_velocity / deceleration;
        let ramp_up_ms = 1000.0 * maximum_velocity / acceleration;
        let ramp_down_ms = 1000.0 * maximum_velocity / deceleration;

        let reaches_cruise = counts >= ramp_up_counts + ramp_down_counts;
        let total_ms = if reaches_cruise {
            1000.0 * counts / maximum_velocity
                + 1000.0 * maximum_velocity * (acceleration + deceleration)
                    / (2.0 * acceleration * deceleration)
        } else {
            // Triangular profile: all ramp, no cruise.
            (2.0 * 1000.0 * 1000.0 * counts * (acceleration + deceleration)
                / (acceleration * deceleration))
                .sqrt()
        };

        Ok(Self {
            counts,
            ramp_up_counts,
            ramp_up_ms,
            ramp_down_counts,
            ramp_down_ms,
            reaches_cruise,
            total_ms,
            acceleration,
            deceleration,
            maximum_velocity,
            counts_per_rotation: f64::from(counts_per_rotation),
        })
    }

    pub fn duration_ms(&self) -> f64 {
        self.total_ms
    }

    /// Encoder counts traveled `elapsed_ms` into the move.
    ///
    /// Only defined for profiles with a cruise phase; a triangular profile
    /// is reported as an error rather than a fabricated position.
    pub fn counts_at(&self, elapsed_ms: f64) -> Result<f64, KinematicsError> {
        if !self.reaches_cruise {
            return Err(KinematicsError::NoCruisePhase);
        }

        let traveled = if elapsed_ms > self.total_ms {
            self.counts
        } else if elapsed_ms < self.ramp_up_ms {
            let t = elapsed_ms / 1000.0;
            0.5 * self.acceleration * t * t
        } else if elapsed_ms > self.total_ms - self.ramp_down_ms {
            let remaining = (self.total_ms - elapsed_ms) / 1000.0;
            self.counts - 0.5 * self.deceleration * remaining * remaining
        } else {
            self.ramp_up_counts + self.maximum_velocity * (elapsed_ms - self.ramp_up_ms) / 1000.0
        };
        Ok(traveled)
    }

    /// Degrees traveled `elapsed_ms` into the move.
    pub fn angle_at(&self, elapsed_ms: f64) -> Result<f64, KinematicsError> {
        Ok(self.counts_at(elapsed_ms)? * 360.0 / self.counts_per_rotation)
    }
}

/// Predicted duration in milliseconds of a move by `angle_degrees`.
pub fn move_duration_ms(
    settings: &MotorSettings,
    counts_per_rotation: u32,
    angle_degrees: f64,
) -> Result<f64, KinematicsError> {
    Ok(MotionProfile::plan(settings, counts_per_rotation, angle_degrees)?.duration_ms())
}

/// Degrees traveled `elapsed_ms` into a move by `move_angle_degrees`.
pub fn angle_at_time(
    settings: &MotorSettings,
    counts_per_rotation: u32,
    move_angle_degrees: f64,
    elapsed_ms: f64,
) -> Result<f64, KinematicsError> {
    MotionProfile::plan(settings, counts_per_rotation, move_angle_degrees)?.angle_at(elapsed_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENCODER_COUNTS_PER_ROTATION;

    const CPR: u32 = ENCODER_COUNTS_PER_ROTATION;

    fn defaults() -> MotorSettings {
        MotorSettings::default()
    }

    #[test]
    fn angle_conversion_rounds_up_toward_positive() {
        assert_eq!(angle_to_counts(90.0, CPR), 1000);
        assert_eq!(angle_to_counts(-90.0, CPR), -1000);
        assert_eq!(angle_to_counts(360.0, CPR), 4000);
        assert_eq!(angle_to_counts(0.05, CPR), 1);
        assert_eq!(angle_to_counts(0.0, CPR), 0);
    }

    #[test]
    fn ninety_degree_move_takes_1100_ms() {
        // counts = 1000, ramp counts 50 + 50 -> cruise reached,
        // 1000 ms of cruise-rate travel plus 100 ms of ramp overhead.
        let profile = MotionProfile::plan(&defaults(), CPR, 90.0).unwrap();
        assert!(profile.reaches_cruise);
        assert_eq!(profile.ramp_up_counts, 50.0);
        assert_eq!(profile.ramp_down_counts, 50.0);
        assert_eq!(profile.ramp_up_ms, 100.0);
        assert!((profile.duration_ms() - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn duration_is_symmetric_in_direction() {
        let settings = defaults();
        for angle in [5.0, 42.0, 90.0, 360.0, 1234.5] {
            let forward = move_duration_ms(&settings, CPR, angle).unwrap();
            let backward = move_duration_ms(&settings, CPR, -angle).unwrap();
            assert!((forward - backward).abs() < 1e-9, "angle {}", angle);
        }
    }

    #[test]
    fn position_starts_at_zero_and_ends_at_the_full_angle() {
        let profile = MotionProfile::plan(&defaults(), CPR, 90.0).unwrap();
        assert_eq!(profile.angle_at(0.0).unwrap(), 0.0);

        let at_end = profile.angle_at(profile.duration_ms()).unwrap();
        assert!((at_end - 90.0).abs() < 1e-6);

        // Past the end the position pins to the full displacement.
        let beyond = profile.angle_at(profile.duration_ms() + 500.0).unwrap();
        assert!((beyond - 90.0).abs() < 1e-9);
    }

    #[test]
    fn position_is_monotone_over_the_move() {
        let profile = MotionProfile::plan(&defaults(), CPR, 90.0).unwrap();
        let total = profile.duration_ms();
        let mut previous = 0.0;
        let mut t = 0.0;
        while t <= total {
            let angle = profile.angle_at(t).unwrap();
            assert!(
                angle >= previous - 1e-9,
                "position regressed at t={} ({} < {})",
                t,
                angle,
                previous
            );
            previous = angle;
            t += 5.0;
        }
    }

    #[test]
    fn cruise_phase_position_tracks_maximum_velocity() {
        let profile = MotionProfile::plan(&defaults(), CPR, 90.0).unwrap();
        // 600 ms in: 50 ramp counts plus 500 ms at 1000 counts/s.
        let counts = profile.counts_at(600.0).unwrap();
        assert!((counts - 550.0).abs() < 1e-9);
    }

    #[test]
    fn short_move_is_triangular() {
        let profile = MotionProfile::plan(&defaults(), CPR, 1.0).unwrap();
        assert!(!profile.reaches_cruise);
        // 12 counts, symmetric 10000 ramps: sqrt(4800) ms.
        assert!((profile.duration_ms() - 4800.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(profile.counts_at(10.0), Err(KinematicsError::NoCruisePhase));
    }

    #[test]
    fn zero_angle_move_has_zero_duration() {
        let profile = MotionProfile::plan(&defaults(), CPR, 0.0).unwrap();
        assert_eq!(profile.duration_ms(), 0.0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = defaults();
        settings.initial_velocity = 100;
        assert_eq!(
            MotionProfile::plan(&settings, CPR, 90.0).unwrap_err(),
            KinematicsError::NonzeroInitialVelocity(100)
        );

        let mut settings = defaults();
        settings.deceleration = 0;
        assert_eq!(
            MotionProfile::plan(&settings, CPR, 90.0).unwrap_err(),
            KinematicsError::ZeroRamp {
                acceleration: 10_000,
                deceleration: 0
            }
        );

        let mut settings = defaults();
        settings.maximum_velocity = 0;
        assert_eq!(
            MotionProfile::plan(&settings, CPR, 90.0).unwrap_err(),
            KinematicsError::ZeroMaximumVelocity
        );
    }
}
