// UDP command listener
//
// Receives command datagrams on port 50001, decodes them, and publishes the
// resulting state changes. Malformed input is logged and dropped; nothing on
// this path fails the task.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{COMMAND_PORT, TELEMETRY_PORT};
use crate::messages::{CommandMessage, Field};
use crate::state::{PeerSlot, SharedVehicle, SpeedLevel};

/// Apply one decoded datagram to the shared state.
///
/// Field policy:
/// - `cmd` and `mode`: unrecognized, wrong-typed, or absent values leave
///   their part of the state untouched, the remaining fields are still
///   processed.
/// - `speed`: absent or unrecognized falls back to Medium -- every message
///   re-asserts a speed, by protocol design.
/// - The sender is recorded as the telemetry peer on every message that
///   decodes, whether or not any field was recognized. The reply port is
///   fixed by the protocol; the sender's ephemeral port is discarded.
pub fn apply_message(
    vehicle: &SharedVehicle,
    peer: &PeerSlot,
    payload: &[u8],
    sender: SocketAddr,
) {
    let msg = match CommandMessage::decode(payload) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("dropping malformed command from {}: {}", sender, e);
            return;
        }
    };

    let reply_to = SocketAddr::new(sender.ip(), TELEMETRY_PORT);
    peer.record(reply_to);
    debug!("telemetry peer is now {}", reply_to);

    vehicle.with(|state| {
        match msg.motion() {
            Field::Value(motion) => {
                info!("command from {}: {:?}", sender, motion);
                state.command_motion(motion);
            }
            Field::Unrecognized => {
                warn!(
                    "unknown cmd {} ignored",
                    msg.cmd.as_ref().map(|v| v.to_string()).unwrap_or_default()
                )
            }
            Field::Absent => {}
        }

        match msg.drive_mode() {
            Field::Value(mode) => {
                info!("mode set to {:?}", mode);
                state.set_mode(mode);
            }
            Field::Unrecognized => {
                warn!(
                    "unknown mode {} ignored",
                    msg.mode.as_ref().map(|v| v.to_string()).unwrap_or_default()
                )
            }
            Field::Absent => {}
        }

        match msg.speed() {
            Field::Value(speed) => state.set_speed(speed),
            Field::Unrecognized | Field::Absent => {
                debug!("speed missing or unrecognized, defaulting to medium");
                state.set_speed(SpeedLevel::Medium);
            }
        }
    });
}

/// Command listener task: owns the receive socket for the process lifetime.
pub struct CommandListener {
    socket: UdpSocket,
    vehicle: SharedVehicle,
    peer: PeerSlot,
}

impl CommandListener {
    /// Bind the fixed command port. Failure here is fatal to startup; there
    /// is no point running a car nobody can steer.
    pub async fn bind(vehicle: SharedVehicle, peer: PeerSlot) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", COMMAND_PORT)).await?;
        info!("Listening for commands on udp/{}", COMMAND_PORT);
        Ok(Self {
            socket,
            vehicle,
            peer,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, sender)) => {
                        apply_message(&self.vehicle, &self.peer, &buf[..len], sender);
                    }
                    Err(e) => {
                        warn!("recv_from failed: {}", e);
                        // Back off so a persistent socket error cannot spin
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Command listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DriveMode, Motion};
    use std::net::{IpAddr, Ipv4Addr};

    fn sender() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)), 39_321)
    }

    fn fixture() -> (SharedVehicle, PeerSlot) {
        (SharedVehicle::new(), PeerSlot::new())
    }

    #[test]
    fn full_command_updates_motion_mode_and_speed() {
        let (vehicle, peer) = fixture();
        apply_message(
            &vehicle,
            &peer,
            br#"{"cmd":"forward","mode":"alway","speed":"high"}"#,
            sender(),
        );

        let state = vehicle.snapshot();
        assert_eq!(state.desired, Motion::Forward);
        assert!(state.changed);
        assert_eq!(state.mode, DriveMode::Continuous);
        assert_eq!(state.speed, SpeedLevel::High);
    }

    #[test]
    fn peer_is_recorded_with_fixed_reply_port() {
        let (vehicle, peer) = fixture();
        apply_message(&vehicle, &peer, br#"{"cmd":"stop"}"#, sender());

        let recorded = peer.get().unwrap();
        assert_eq!(recorded.ip(), sender().ip());
        assert_eq!(recorded.port(), TELEMETRY_PORT, "ephemeral port discarded");
    }

    #[test]
    fn malformed_payload_changes_nothing_and_records_no_peer() {
        let (vehicle, peer) = fixture();
        apply_message(&vehicle, &peer, b"{not json", sender());

        let state = vehicle.snapshot();
        assert_eq!(state.desired, Motion::Stop);
        assert!(!state.changed);
        assert!(peer.get().is_none());
    }

    #[test]
    fn unknown_cmd_is_ignored_but_other_fields_apply() {
        let (vehicle, peer) = fixture();
        apply_message(
            &vehicle,
            &peer,
            br#"{"cmd":"launch","mode":"step","speed":"low"}"#,
            sender(),
        );

        let state = vehicle.snapshot();
        assert_eq!(state.desired, Motion::Stop, "motion untouched");
        assert!(!state.changed);
        assert_eq!(state.mode, DriveMode::Step);
        assert_eq!(state.speed, SpeedLevel::Low);
        assert!(peer.get().is_some(), "decoded message still records peer");
    }

    #[test]
    fn wrong_typed_field_does_not_drop_the_message() {
        let (vehicle, peer) = fixture();
        apply_message(&vehicle, &peer, br#"{"cmd":123,"speed":"high"}"#, sender());

        let state = vehicle.snapshot();
        assert_eq!(state.desired, Motion::Stop, "bad cmd ignored, motion untouched");
        assert!(!state.changed);
        assert_eq!(state.speed, SpeedLevel::High, "speed still applied");
        assert!(peer.get().is_some(), "sender still recorded");
    }

    #[test]
    fn unknown_mode_leaves_mode_unchanged() {
        let (vehicle, peer) = fixture();
        vehicle.with(|s| s.set_mode(DriveMode::Continuous));

        apply_message(&vehicle, &peer, br#"{"mode":"sideways"}"#, sender());
        assert_eq!(vehicle.snapshot().mode, DriveMode::Continuous);
    }

    #[test]
    fn absent_speed_defaults_to_medium() {
        let (vehicle, peer) = fixture();
        vehicle.with(|s| s.set_speed(SpeedLevel::High));

        apply_message(&vehicle, &peer, br#"{"cmd":"forward"}"#, sender());
        assert_eq!(vehicle.snapshot().speed, SpeedLevel::Medium);
    }

    #[test]
    fn unrecognized_speed_defaults_to_medium() {
        let (vehicle, peer) = fixture();
        vehicle.with(|s| s.set_speed(SpeedLevel::Low));

        apply_message(
            &vehicle,
            &peer,
            br#"{"cmd":"forward","speed":"purple"}"#,
            sender(),
        );
        assert_eq!(vehicle.snapshot().speed, SpeedLevel::Medium);
    }

    #[test]
    fn each_message_overwrites_the_peer() {
        let (vehicle, peer) = fixture();
        apply_message(&vehicle, &peer, br#"{"cmd":"stop"}"#, sender());

        let second = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 5_000);
        apply_message(&vehicle, &peer, br#"{"cmd":"stop"}"#, second);

        let recorded = peer.get().unwrap();
        assert_eq!(recorded.ip(), second.ip());
        assert_eq!(recorded.port(), TELEMETRY_PORT);
    }
}
