// Shared vehicle state
//
// The control loop, the command listener, and the telemetry broadcaster all
// run concurrently and share two records: the vehicle state and the address
// of the last controller that spoke to us. Both live behind a mutex and are
// only ever read or written as a whole, so no task can observe a half-written
// update.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::STEP_TICKS;

/// Motion direction, shared between commands (`desired`) and actuation (`actual`).
///
/// Serializes with the wire spelling of the status report, where a vehicle at
/// rest reports `"stopped"` (the inbound command spelling is `"stop"`, see
/// [`Motion::from_wire`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Motion {
    #[serde(rename = "stopped")]
    Stop,
    Forward,
    Backward,
    Left,
    Right,
}

impl Motion {
    /// Total mapping from the inbound `cmd` field. `None` means unrecognized.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(Motion::Forward),
            "backward" => Some(Motion::Backward),
            "left" => Some(Motion::Left),
            "right" => Some(Motion::Right),
            "stop" => Some(Motion::Stop),
            _ => None,
        }
    }
}

/// Drive mode: step mode halts after [`STEP_TICKS`] ticks of motion,
/// continuous mode drives until an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Step,
    Continuous,
}

impl DriveMode {
    /// Total mapping from the inbound `mode` field. The continuous spelling
    /// is `"alway"` -- inherited from the protocol, not a typo on our side.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "step" => Some(DriveMode::Step),
            "alway" => Some(DriveMode::Continuous),
            _ => None,
        }
    }
}

/// Three-point speed selection; the PWM backend maps each level to a
/// duty-cycle/frequency pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SpeedLevel {
    /// Total mapping from the inbound `speed` field. `None` means
    /// unrecognized; the caller is expected to fall back to Medium.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "low" => Some(SpeedLevel::Low),
            "medium" => Some(SpeedLevel::Medium),
            "high" => Some(SpeedLevel::High),
            _ => None,
        }
    }
}

/// The single shared vehicle record.
///
/// `desired` is what the controller last asked for, `actual` is what the
/// wheels are doing. The control loop is the only writer of `actual` and
/// `step_budget`; the command listener writes `desired`/`mode`/`speed`.
#[derive(Debug, Clone, Copy)]
pub struct VehicleState {
    pub desired: Motion,
    pub actual: Motion,
    pub mode: DriveMode,
    pub step_budget: u32,
    pub speed: SpeedLevel,
    /// Set when `desired` changes (and always for a stop command); consumed
    /// and cleared exactly once per control-loop tick.
    pub changed: bool,
}

impl VehicleState {
    pub fn new() -> Self {
        Self {
            desired: Motion::Stop,
            actual: Motion::Stop,
            mode: DriveMode::Step,
            step_budget: STEP_TICKS,
            speed: SpeedLevel::Medium,
            changed: false,
        }
    }

    /// Register a motion command.
    ///
    /// A duplicate command for the direction already requested leaves the
    /// change flag alone, so a flood of identical packets cannot re-trigger
    /// actuation. Stop is the exception: it always raises the flag, and the
    /// control loop re-issues the (idempotent) stop as a watchdog reset.
    pub fn command_motion(&mut self, motion: Motion) {
        if motion != self.desired {
            self.desired = motion;
            self.changed = true;
        } else if motion == Motion::Stop {
            self.changed = true;
        }
    }

    pub fn set_mode(&mut self, mode: DriveMode) {
        self.mode = mode;
    }

    pub fn set_speed(&mut self, speed: SpeedLevel) {
        self.speed = speed;
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the mutex-guarded [`VehicleState`]; clone freely across tasks.
#[derive(Debug, Clone)]
pub struct SharedVehicle(Arc<Mutex<VehicleState>>);

impl SharedVehicle {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(VehicleState::new())))
    }

    /// Copy of the current state. Used by telemetry, which must never hold
    /// the lock across a send.
    pub fn snapshot(&self) -> VehicleState {
        *self.0.lock()
    }

    /// Run `f` with exclusive access. Critical sections stay short and are
    /// never held across an await point.
    pub fn with<R>(&self, f: impl FnOnce(&mut VehicleState) -> R) -> R {
        f(&mut self.0.lock())
    }
}

impl Default for SharedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

/// Last controller endpoint, written by the command listener and read by the
/// telemetry broadcaster.
///
/// The whole `SocketAddr` is swapped under the lock in one step, so a reader
/// can never pair a new IP with a stale port. Absent until the first valid
/// command; overwritten, never merged, on each one after that.
#[derive(Debug, Clone, Default)]
pub struct PeerSlot(Arc<Mutex<Option<SocketAddr>>>);

impl PeerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, addr: SocketAddr) {
        *self.0.lock() = Some(addr);
    }

    pub fn get(&self) -> Option<SocketAddr> {
        *self.0.lock()
    }
}
