// Vehicle state machine (control loop)
//
// A ~1 ms polling cycle turns the commanded motion into actuation and
// enforces the step-mode travel bound. This task is the only writer of
// `actual` and `step_budget`, and the only consumer of the change flag.

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::{STEP_TICKS, TICK_PERIOD};
use crate::motor::Actuator;
use crate::state::{DriveMode, Motion, SharedVehicle, VehicleState};

/// One control-loop tick.
///
/// Transition rules:
/// - With the change flag up: stop is actuated unconditionally; a command
///   for the direction already in progress is a no-op (duplicate packets
///   must not re-trigger the hardware or reset the step budget); anything
///   else actuates the new direction and resets the step budget.
/// - Independently, step mode decays the budget while moving; exhaustion
///   raises a forced stop that the *next* tick actuates (one tick of
///   latency before the wheels actually stop).
pub fn tick(state: &mut VehicleState, actuator: &mut dyn Actuator) {
    if state.changed {
        state.changed = false;

        if state.desired == Motion::Stop {
            // Always re-issued, even when already stopped: the stop path is
            // idempotent and doubles as a watchdog reset.
            actuator.stop_all();
            state.actual = Motion::Stop;
            info!("stopped");
        } else if state.actual != state.desired {
            state.actual = state.desired;
            state.step_budget = STEP_TICKS;
            actuator.set_direction(state.actual, state.speed);
            info!("driving {:?} at {:?}", state.actual, state.speed);
        } else {
            debug!("duplicate {:?} command ignored", state.desired);
        }
    }

    if state.mode == DriveMode::Step && state.actual != Motion::Stop {
        if state.step_budget > 0 {
            state.step_budget -= 1;
        } else {
            info!("step budget exhausted, stopping");
            state.desired = Motion::Stop;
            state.changed = true;
        }
    }
}

/// Poll the shared state at the fixed tick period until shutdown.
pub async fn control_loop(
    vehicle: SharedVehicle,
    mut actuator: Box<dyn Actuator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(TICK_PERIOD);
    info!(
        "Control loop started: {} ms tick, {} tick step budget",
        TICK_PERIOD.as_millis(),
        STEP_TICKS
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                vehicle.with(|state| tick(state, actuator.as_mut()));
            }
            _ = shutdown.changed() => break,
        }
    }

    // Leave the motors parked on the way out
    actuator.stop_all();
    info!("Control loop stopped");
}
