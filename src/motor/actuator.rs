use tracing::info;

use crate::state::{Motion, SpeedLevel};

/// Abstraction over the drive hardware.
///
/// Fire-and-forget at this boundary: backends log their own faults and the
/// control loop never sees them -- the next tick's state evaluation is the
/// recovery path.
pub trait Actuator: Send {
    /// Drive in `motion` at `speed`. Never called with [`Motion::Stop`];
    /// stopping goes through [`Actuator::stop_all`].
    fn set_direction(&mut self, motion: Motion, speed: SpeedLevel);

    /// De-energize every output channel. Must be safe to call redundantly.
    fn stop_all(&mut self);
}

/// Log-only actuator for running the runtime without motors attached.
pub struct SimActuator;

impl Actuator for SimActuator {
    fn set_direction(&mut self, motion: Motion, speed: SpeedLevel) {
        info!("sim: drive {:?} at {:?}", motion, speed);
    }

    fn stop_all(&mut self) {
        info!("sim: all channels off");
    }
}
