// Protocol timing, retry policy, and default motion settings
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Encoder counts per full rotation of the motor shaft
pub const ENCODER_COUNTS_PER_ROTATION: u32 = 4000;

// Response framing: the controller either answers inside this window or not
// at all, and the accumulating buffer is re-checked at the poll interval
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(15);

// Polling cadence while a move is in flight, and the fallback bound on how
// long a blocking move may wait
pub const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(10_000);

// Homing retry policy
pub const HOME_RETRIES: u32 = 5;
pub const HOME_RETRY_DELAY: Duration = Duration::from_millis(1000);

// Encoder displacement of the index mark relative to the desired zero
pub const HOME_REFERENCE_COUNTS: i32 = -1322;

// Factory motion parameters; acceleration and deceleration match so the
// default profile is symmetric
pub const DEFAULT_ACCELERATION: u32 = 10_000;
pub const DEFAULT_DECELERATION: u32 = 10_000;
pub const DEFAULT_INITIAL_VELOCITY: u32 = 0;
pub const DEFAULT_MAXIMUM_VELOCITY: u32 = 1000;
pub const DEFAULT_RUN_CURRENT: u32 = 80;
pub const DEFAULT_HOLD_CURRENT: u32 = 80;

/// Per-driver copy of the timing and retry literals.
///
/// Each driver owns its config, so tests can shrink timeouts without
/// touching anything process-wide.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub response_poll_interval: Duration,
    pub response_timeout: Duration,
    pub block_poll_interval: Duration,
    pub default_block_timeout: Duration,
    pub home_retries: u32,
    pub home_retry_delay: Duration,
    pub counts_per_rotation: u32,
    pub home_reference_counts: i32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            response_poll_interval: RESPONSE_POLL_INTERVAL,
            response_timeout: RESPONSE_TIMEOUT,
            block_poll_interval: BLOCK_POLL_INTERVAL,
            default_block_timeout: DEFAULT_BLOCK_TIMEOUT,
            home_retries: HOME_RETRIES,
            home_retry_delay: HOME_RETRY_DELAY,
            counts_per_rotation: ENCODER_COUNTS_PER_ROTATION,
            home_reference_counts: HOME_REFERENCE_COUNTS,
        }
    }
}

/// Motion parameters mirrored to the controller.
///
/// Velocities and ramps are in encoder counts per second (squared); run and
/// hold current are in the controller's 0-100 scale. Fields left out of a
/// JSON settings file keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    pub acceleration: u32,
    pub deceleration: u32,
    pub initial_velocity: u32,
    pub maximum_velocity: u32,
    pub run_current: u32,
    pub hold_current: u32,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            acceleration: DEFAULT_ACCELERATION,
            deceleration: DEFAULT_DECELERATION,
            initial_velocity: DEFAULT_INITIAL_VELOCITY,
            maximum_velocity: DEFAULT_MAXIMUM_VELOCITY,
            run_current: DEFAULT_RUN_CURRENT,
            hold_current: DEFAULT_HOLD_CURRENT,
        }
    }
}
