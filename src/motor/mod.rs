// Motor control module for the differential-drive base
//
// Provides:
// - The `Actuator` trait the control loop drives
// - A log-only simulator for running without hardware
// - A Linux sysfs PWM backend (two channels per side)

mod actuator;
pub mod pwm;

pub use actuator::{Actuator, SimActuator};
pub use pwm::{PwmActuator, PwmError};
