// High-level motor driver.
//
// Sequences MCode commands into moves with bounded blocking, stall
// recovery, and the multi-retry homing procedure. One driver owns one
// controller connection; nothing here is safe to share across threads, so
// multi-motor systems run one driver per motor.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::kinematics::{self, KinematicsError, MotionProfile};
use super::mcode::{McodeBus, McodeError};
use super::transport::{TcpTransport, Transport};
use crate::config::{DriverConfig, MotorSettings};

// Counts moved backwards before seeking the index, so the seek approaches
// the mark from a known side even after a prior overshoot.
const HOME_BACKOFF_COUNTS: i64 = -20;
const HOME_BACKOFF_TIMEOUT: Duration = Duration::from_millis(2000);

// Window for the controller to find the index mark during one attempt.
const HOME_SEEK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Driver for one MDrive motor reachable over TCP.
///
/// Construct, connect, initialize settings, then issue moves. Motion
/// outcomes are reported as `Ok(bool)` (did the move complete cleanly);
/// `Err` is reserved for link-level failures.
pub struct MotorDriver {
    host: String,
    port: u16,
    bus: McodeBus,
    config: DriverConfig,
    settings: MotorSettings,
}

impl MotorDriver {
    /// A driver for the controller at `host:port`, not yet connected.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_config(host, port, DriverConfig::default())
    }

    /// Same, with explicit timing/retry configuration.
    pub fn with_config(host: &str, port: u16, config: DriverConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            bus: McodeBus::new(&config),
            config,
            settings: MotorSettings::default(),
        }
    }

    /// A driver over an already-open link. Used with in-memory transports
    /// in tests and for links other than plain TCP.
    pub fn with_transport(transport: Box<dyn Transport>, config: DriverConfig) -> Self {
        let mut bus = McodeBus::new(&config);
        bus.attach(transport);
        Self {
            host: String::new(),
            port: 0,
            bus,
            config,
            settings: MotorSettings::default(),
        }
    }

    /// Open the TCP link. Every protocol operation fails with
    /// `NotConnected` until this succeeds.
    pub fn connect(&mut self) -> Result<(), McodeError> {
        info!("Connecting to motor at {}:{}", self.host, self.port);
        let transport = TcpTransport::connect(&self.host, self.port)?;
        self.bus.attach(Box::new(transport));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Send a raw MCode command and return its echo-stripped response.
    pub fn send_command(&mut self, command: &str) -> Result<String, McodeError> {
        self.bus.send_command(command)
    }

    /// The most recent echo-stripped response.
    pub fn last_response(&self) -> &str {
        self.bus.response()
    }

    /// Push a full set of motion parameters to the controller.
    ///
    /// Clears any stale stall flag, switches the controller to encoder
    /// units, then applies each parameter. Returns whether every set was
    /// confirmed; unconfirmed parameters keep their previous local value.
    pub fn initialize_settings(&mut self, settings: &MotorSettings) -> Result<bool, McodeError> {
        info!("Initializing motor settings: {:?}", settings);
        self.bus.send_command("ST 0")?;
        self.bus.send_command("EE 1")?;

        let mut confirmed = self.set_acceleration(settings.acceleration)?;
        confirmed &= self.set_deceleration(settings.deceleration)?;
        confirmed &= self.set_initial_velocity(settings.initial_velocity)?;
        confirmed &= self.set_maximum_velocity(settings.maximum_velocity)?;
        confirmed &= self.set_run_current(settings.run_current)?;
        confirmed &= self.set_hold_current(settings.hold_current)?;

        if !confirmed {
            warn!("Controller did not confirm every motion setting");
        }
        Ok(confirmed)
    }

    pub fn set_acceleration(&mut self, acceleration: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("A", acceleration)?;
        if confirmed {
            self.settings.acceleration = acceleration;
        }
        Ok(confirmed)
    }

    pub fn set_deceleration(&mut self, deceleration: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("D", deceleration)?;
        if confirmed {
            self.settings.deceleration = deceleration;
        }
        Ok(confirmed)
    }

    pub fn set_initial_velocity(&mut self, initial_velocity: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("VI", initial_velocity)?;
        if confirmed {
            self.settings.initial_velocity = initial_velocity;
        }
        Ok(confirmed)
    }

    pub fn set_maximum_velocity(&mut self, maximum_velocity: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("VM", maximum_velocity)?;
        if confirmed {
            self.settings.maximum_velocity = maximum_velocity;
        }
        Ok(confirmed)
    }

    pub fn set_run_current(&mut self, run_current: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("RC", run_current)?;
        if confirmed {
            self.settings.run_current = run_current;
        }
        Ok(confirmed)
    }

    pub fn set_hold_current(&mut self, hold_current: u32) -> Result<bool, McodeError> {
        let confirmed = self.send_setting("HC", hold_current)?;
        if confirmed {
            self.settings.hold_current = hold_current;
        }
        Ok(confirmed)
    }

    /// The committed local mirror of the controller-side settings.
    pub fn settings(&self) -> &MotorSettings {
        &self.settings
    }

    pub fn acceleration(&self) -> u32 {
        self.settings.acceleration
    }

    pub fn deceleration(&self) -> u32 {
        self.settings.deceleration
    }

    pub fn initial_velocity(&self) -> u32 {
        self.settings.initial_velocity
    }

    pub fn maximum_velocity(&self) -> u32 {
        self.settings.maximum_velocity
    }

    pub fn run_current(&self) -> u32 {
        self.settings.run_current
    }

    pub fn hold_current(&self) -> u32 {
        self.settings.hold_current
    }

    // Send one `<mnemonic> <value>` set command. The local mirror is
    // committed by the caller only when the reply framed in time, so a
    // dead controller cannot drift away from local state silently.
    fn send_setting(&mut self, mnemonic: &str, value: u32) -> Result<bool, McodeError> {
        self.bus.send_command(&format!("{mnemonic} {value}"))?;
        let confirmed = self.bus.last_exchange_framed();
        if !confirmed {
            warn!(
                "Set {} {} was not acknowledged; keeping the previous local value",
                mnemonic, value
            );
        }
        Ok(confirmed)
    }

    /// Move by a relative angle in degrees.
    pub fn move_angle_relative(
        &mut self,
        angle_degrees: f64,
        timeout: Duration,
    ) -> Result<bool, McodeError> {
        let counts = kinematics::angle_to_counts(angle_degrees, self.config.counts_per_rotation);
        self.move_relative(counts, timeout)
    }

    /// Move to an absolute angle in degrees.
    pub fn move_angle_absolute(
        &mut self,
        angle_degrees: f64,
        timeout: Duration,
    ) -> Result<bool, McodeError> {
        let counts = kinematics::angle_to_counts(angle_degrees, self.config.counts_per_rotation);
        self.move_absolute(counts, timeout)
    }

    /// Move by `counts` encoder counts.
    ///
    /// A zero `timeout` fires the command without waiting and reports
    /// success immediately; otherwise the call blocks until the motor
    /// stops or the timeout elapses, then checks for a stall.
    pub fn move_relative(&mut self, counts: i64, timeout: Duration) -> Result<bool, McodeError> {
        self.issue_move("MR", counts, timeout)
    }

    /// Move to absolute position `counts`. Same blocking contract as
    /// [`move_relative`](Self::move_relative).
    pub fn move_absolute(&mut self, counts: i64, timeout: Duration) -> Result<bool, McodeError> {
        self.issue_move("MA", counts, timeout)
    }

    fn issue_move(
        &mut self,
        mnemonic: &str,
        counts: i64,
        timeout: Duration,
    ) -> Result<bool, McodeError> {
        if !timeout.is_zero() {
            // Start from a clean stall flag so the post-move check only
            // sees stalls belonging to this move.
            self.bus.send_command("ST 0")?;
        }

        self.bus.send_command(&format!("{mnemonic} {counts}"))?;

        if timeout.is_zero() {
            return Ok(true);
        }

        let stopped = self.block_while_moving(timeout)?;
        let stalled = self.detect_stall()?;
        Ok(stopped && !stalled)
    }

    /// Poll the controller until it reports the motor stopped, bounded by
    /// `timeout`. Returns whether the motor stopped in time.
    pub fn block_while_moving(&mut self, timeout: Duration) -> Result<bool, McodeError> {
        self.block_while_moving_at(timeout, self.config.block_poll_interval)
    }

    /// Same, with a per-call poll interval.
    pub fn block_while_moving_at(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<bool, McodeError> {
        let block_start = Instant::now();
        while self.is_moving(true)? && block_start.elapsed() <= timeout {
            thread::sleep(poll_interval);
        }

        // Re-query so the verdict reflects a fresh answer rather than the
        // last poll before the deadline.
        if self.is_moving(true)? {
            warn!(
                "Timeout: motor at {}:{} did not stop within {:?}",
                self.host, self.port, timeout
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether the controller reports motion in progress. `default`
    /// decides how an ambiguous or missing answer reads; blocking waits
    /// pass `true` so a silent controller counts as still moving.
    pub fn is_moving(&mut self, default: bool) -> Result<bool, McodeError> {
        self.bus.send_command("PR MV")?;
        Ok(self.bus.response_bool(default))
    }

    /// Read the stall flag, then clear it so the next move starts clean.
    /// Ambiguous answers read as no stall.
    pub fn detect_stall(&mut self) -> Result<bool, McodeError> {
        self.bus.send_command("PR ST")?;
        let stalled = self.bus.response_bool(false);

        if stalled {
            warn!("Stall detected on motor at {}:{}", self.host, self.port);
        }

        self.bus.send_command("ST 0")?;
        Ok(stalled)
    }

    /// Establish the absolute position reference from the index mark.
    ///
    /// Each attempt backs the motor off past the mark, homes to the index,
    /// and asks the controller whether the index was seen. On success the
    /// encoder origin is shifted by the homing reference offset and the
    /// motor is parked at zero; after the configured number of failed
    /// attempts the motor must be treated as unhomed.
    pub fn home_to_index(&mut self) -> Result<bool, McodeError> {
        let mut found = false;
        for attempt in 0..self.config.home_retries {
            if attempt != 0 {
                warn!(
                    "Motor at {}:{} was unable to home to index, retrying in {:?}",
                    self.host, self.port, self.config.home_retry_delay
                );
                thread::sleep(self.config.home_retry_delay);
            }

            self.move_relative(HOME_BACKOFF_COUNTS, HOME_BACKOFF_TIMEOUT)?;
            self.bus.send_command("HI 3")?;
            self.block_while_moving(HOME_SEEK_TIMEOUT)?;
            self.detect_stall()?;

            self.bus.send_command("PR I6")?;
            found = self.bus.response_bool(false);
            if found {
                break;
            }
        }

        if !found {
            error!(
                "Motor at {}:{} was unable to home to index after {} attempts",
                self.host, self.port, self.config.home_retries
            );
            return Ok(false);
        }

        let origin = -i64::from(self.config.home_reference_counts);
        self.bus.send_command(&format!("C2 {origin}"))?;
        self.move_absolute(0, self.config.default_block_timeout)?;
        info!("Motor at {}:{} homed to index", self.host, self.port);
        Ok(true)
    }

    /// Predicted duration in milliseconds of a move by `angle_degrees`
    /// under the committed settings.
    pub fn move_duration_ms(&self, angle_degrees: f64) -> Result<f64, KinematicsError> {
        kinematics::move_duration_ms(&self.settings, self.config.counts_per_rotation, angle_degrees)
    }

    /// Degrees traveled `elapsed_ms` into a move by `move_angle_degrees`.
    pub fn angle_at_time(
        &self,
        move_angle_degrees: f64,
        elapsed_ms: f64,
    ) -> Result<f64, KinematicsError> {
        kinematics::angle_at_time(
            &self.settings,
            self.config.counts_per_rotation,
            move_angle_degrees,
            elapsed_ms,
        )
    }

    /// The full velocity profile for a move by `angle_degrees`.
    pub fn profile(&self, angle_degrees: f64) -> Result<MotionProfile, KinematicsError> {
        MotionProfile::plan(&self.settings, self.config.counts_per_rotation, angle_degrees)
    }
}
