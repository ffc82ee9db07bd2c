// Wire types for the control protocol
//
// Inbound: JSON command datagrams on port 50001. Every field is optional and
// each is processed independently; unknown top-level fields are ignored
// (serde's default), and a known field of the wrong type maps to the
// unrecognized outcome for that field alone. Only a malformed or non-object
// payload fails to decode.
//
// Outbound: JSON status reports, sent to the last controller every 500 ms.

use serde::{Deserialize, Serialize};

use crate::state::{DriveMode, Motion, SpeedLevel, VehicleState};

/// Outcome of mapping one optional wire field onto its enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Absent,
    /// Present but not a string from the closed set (wrong type included).
    Unrecognized,
    Value(T),
}

fn map_field<T>(raw: Option<&serde_json::Value>, parse: impl Fn(&str) -> Option<T>) -> Field<T> {
    match raw {
        None => Field::Absent,
        Some(value) => match value.as_str().and_then(|s| parse(s)) {
            Some(v) => Field::Value(v),
            None => Field::Unrecognized,
        },
    }
}

/// Inbound command message. `{"cmd": "forward", "mode": "step", "speed": "low"}`
///
/// Fields are kept as raw JSON values so a wrong-typed field degrades to
/// [`Field::Unrecognized`] instead of dropping the whole message.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommandMessage {
    pub cmd: Option<serde_json::Value>,
    pub mode: Option<serde_json::Value>,
    pub speed: Option<serde_json::Value>,
}

impl CommandMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;

        let value: serde_json::Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(serde_json::Error::custom("payload is not a JSON object"));
        }
        serde_json::from_value(value)
    }

    pub fn motion(&self) -> Field<Motion> {
        map_field(self.cmd.as_ref(), Motion::from_wire)
    }

    pub fn drive_mode(&self) -> Field<DriveMode> {
        map_field(self.mode.as_ref(), DriveMode::from_wire)
    }

    pub fn speed(&self) -> Field<SpeedLevel> {
        map_field(self.speed.as_ref(), SpeedLevel::from_wire)
    }
}

/// Outbound status report. `{"status": "forward", "speed": "medium"}`
///
/// `status` reports the actuated motion, not the pending command, so a
/// controller sees `"stopped"` only once the wheels have actually stopped.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusReport {
    pub status: Motion,
    pub speed: SpeedLevel,
}

impl From<&VehicleState> for StatusReport {
    fn from(state: &VehicleState) -> Self {
        Self {
            status: state.actual,
            speed: state.speed,
        }
    }
}

impl StatusReport {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
