// Task wiring: one shared vehicle record, three loops
//
// - control loop: ~1 ms tick, drives the actuator
// - command listener: blocks on the next datagram
// - telemetry broadcaster: 500 ms period
//
// All three run for the process lifetime and observe a shared shutdown
// signal between iterations.

use std::io;
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::command::CommandListener;
use crate::control;
use crate::motor::{Actuator, PwmActuator, PwmError, SimActuator};
use crate::state::{PeerSlot, SharedVehicle};
use crate::telemetry::{self, TelemetryError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to bind command socket: {0}")]
    CommandBind(#[source] io::Error),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to open PWM actuator: {0}")]
    Actuator(#[from] PwmError),
}

pub struct RunOptions {
    /// Log actuation instead of driving PWM hardware.
    pub simulate: bool,
    /// Sysfs PWM chip directory.
    pub pwm_chip: PathBuf,
}

pub async fn run(opts: RunOptions) -> Result<(), RuntimeError> {
    let vehicle = SharedVehicle::new();
    let peer = PeerSlot::new();

    let actuator: Box<dyn Actuator> = if opts.simulate {
        info!("Running with simulated actuation");
        Box::new(SimActuator)
    } else {
        Box::new(PwmActuator::open(&opts.pwm_chip)?)
    };

    // Endpoint bootstrap is the only fatal path; everything after this point
    // recovers locally.
    let listener = CommandListener::bind(vehicle.clone(), peer.clone())
        .await
        .map_err(RuntimeError::CommandBind)?;
    let broadcaster = telemetry::udp_broadcaster(vehicle.clone(), peer)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control_task = tokio::spawn(control::control_loop(
        vehicle,
        actuator,
        shutdown_rx.clone(),
    ));
    let listener_task = tokio::spawn(listener.run(shutdown_rx.clone()));
    let telemetry_task = tokio::spawn(broadcaster.run(shutdown_rx));

    info!("Runtime started");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("failed to listen for ctrl-c, shutting down: {}", e),
    }
    // Receivers see the flip between iterations
    let _ = shutdown_tx.send(true);

    for task in [control_task, listener_task, telemetry_task] {
        if let Err(e) = task.await {
            warn!("task ended abnormally: {}", e);
        }
    }

    info!("Runtime stopped");
    Ok(())
}
