// Motor control module for MDrive MCode controllers
//
// Provides:
// - Byte-stream transport abstraction (TCP client link)
// - MCode ASCII command protocol with response framing
// - Trapezoidal velocity-profile kinematics
// - High-level motor driver API

mod driver;
pub mod kinematics;
pub mod mcode;
pub mod transport;

pub use driver::MotorDriver;
pub use kinematics::{KinematicsError, MotionProfile};
pub use mcode::{McodeBus, McodeError};
pub use transport::{TcpTransport, Transport};
