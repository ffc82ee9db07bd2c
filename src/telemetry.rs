// Telemetry broadcaster
//
// Every 500 ms, serializes `{status, speed}` from the vehicle state and
// sends it to the last controller that issued a command. Send failures are
// counted; after ten in a row the socket is torn down and rebuilt before the
// next attempt (bounded retry with self-healing, never fatal).

use std::io;
use std::net::SocketAddr;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{MAX_SEND_FAILURES, TELEMETRY_PERIOD, TELEMETRY_PORT};
use crate::messages::StatusReport;
use crate::state::{PeerSlot, SharedVehicle};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to bind telemetry socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to send status report: {0}")]
    Send(#[source] io::Error),

    #[error("failed to encode status report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of one broadcast cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// Report delivered, `n` bytes on the wire.
    Sent(usize),
    /// No controller has spoken to us yet; deliberate no-op, not an error.
    NotReady,
}

/// Datagram endpoint the broadcaster sends through. Abstracted so the
/// failure-recovery path can be exercised without a network.
pub trait StatusEndpoint {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

/// Real endpoint: a UDP socket bound to the fixed telemetry source port.
///
/// Plain blocking sends are fine here; UDP sendto does not block in practice
/// and this keeps the endpoint trivially rebuildable.
pub struct UdpEndpoint(std::net::UdpSocket);

impl UdpEndpoint {
    pub fn open() -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", TELEMETRY_PORT))?;
        Ok(Self(socket))
    }
}

impl StatusEndpoint for UdpEndpoint {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.0.send_to(payload, dest)
    }
}

pub struct Broadcaster<E, F>
where
    E: StatusEndpoint,
    F: FnMut() -> io::Result<E>,
{
    vehicle: SharedVehicle,
    peer: PeerSlot,
    endpoint: Option<E>,
    reopen: F,
    consecutive_failures: u32,
}

/// Broadcaster over the real UDP endpoint.
pub fn udp_broadcaster(
    vehicle: SharedVehicle,
    peer: PeerSlot,
) -> Result<Broadcaster<UdpEndpoint, impl FnMut() -> io::Result<UdpEndpoint>>, TelemetryError> {
    Broadcaster::new(vehicle, peer, UdpEndpoint::open)
}

impl<E, F> Broadcaster<E, F>
where
    E: StatusEndpoint,
    F: FnMut() -> io::Result<E>,
{
    /// Open the initial endpoint. Failing to bind at startup is fatal to the
    /// task; there is no peer-facing fallback without a bound source port.
    pub fn new(vehicle: SharedVehicle, peer: PeerSlot, mut reopen: F) -> Result<Self, TelemetryError> {
        let endpoint = reopen().map_err(TelemetryError::Bind)?;
        info!("Telemetry socket bound on udp/{}", TELEMETRY_PORT);
        Ok(Self {
            vehicle,
            peer,
            endpoint: Some(endpoint),
            reopen,
            consecutive_failures: 0,
        })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One broadcast cycle.
    ///
    /// Rebuilds the endpoint first when the failure threshold has been hit;
    /// if the rebuild fails the counter keeps growing and the cycle is
    /// skipped, so a dead network cannot wedge the task in a tight loop.
    pub fn broadcast_once(&mut self) -> Result<Broadcast, TelemetryError> {
        if self.consecutive_failures >= MAX_SEND_FAILURES {
            warn!(
                "{} consecutive send failures, rebuilding telemetry socket",
                self.consecutive_failures
            );
            self.endpoint = None; // torn down; rebuilt below before the attempt
        }

        // A vacant slot (threshold just hit, or a previous rebuild failed)
        // is refilled here or the cycle is skipped; past this point an
        // endpoint is always in hand.
        let endpoint = match &mut self.endpoint {
            Some(endpoint) => endpoint,
            vacant => match (self.reopen)() {
                Ok(endpoint) => {
                    self.consecutive_failures = 0;
                    info!("Telemetry socket rebuilt");
                    vacant.insert(endpoint)
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    return Err(TelemetryError::Bind(e));
                }
            },
        };

        let Some(dest) = self.peer.get() else {
            return Ok(Broadcast::NotReady);
        };

        let report = StatusReport::from(&self.vehicle.snapshot());
        let payload = report.encode()?;

        match endpoint.send_to(&payload, dest) {
            Ok(n) => {
                self.consecutive_failures = 0;
                debug!("status sent to {}: {} bytes", dest, n);
                Ok(Broadcast::Sent(n))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                Err(TelemetryError::Send(e))
            }
        }
    }

    /// Periodic task: broadcast on the fixed period until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(TELEMETRY_PERIOD);
        info!(
            "Telemetry broadcaster started: {} ms period",
            TELEMETRY_PERIOD.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.broadcast_once() {
                        Ok(Broadcast::Sent(_)) => {}
                        Ok(Broadcast::NotReady) => {
                            debug!("no controller yet, skipping status send");
                        }
                        Err(e) => {
                            warn!(
                                "telemetry cycle failed ({} in a row): {}",
                                self.consecutive_failures, e
                            );
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Telemetry broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::net::{IpAddr, Ipv4Addr};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeNet {
        fail_sends: Rc<Cell<bool>>,
        fail_opens: Rc<Cell<bool>>,
        opens: Rc<Cell<u32>>,
        sent: Rc<RefCell<Vec<(Vec<u8>, SocketAddr)>>>,
    }

    struct FakeEndpoint(FakeNet);

    impl FakeNet {
        fn opener(&self) -> impl FnMut() -> io::Result<FakeEndpoint> + '_ {
            move || {
                if self.fail_opens.get() {
                    return Err(io::Error::new(io::ErrorKind::AddrInUse, "bind refused"));
                }
                self.opens.set(self.opens.get() + 1);
                Ok(FakeEndpoint(self.clone()))
            }
        }
    }

    impl StatusEndpoint for FakeEndpoint {
        fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
            if self.0.fail_sends.get() {
                return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "no route"));
            }
            self.0.sent.borrow_mut().push((payload.to_vec(), dest));
            Ok(payload.len())
        }
    }

    fn peer_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)), TELEMETRY_PORT)
    }

    #[test]
    fn not_ready_until_first_peer() {
        let net = FakeNet::default();
        let vehicle = SharedVehicle::new();
        let peer = PeerSlot::new();
        let mut broadcaster = Broadcaster::new(vehicle, peer.clone(), net.opener()).unwrap();

        assert_eq!(broadcaster.broadcast_once().unwrap(), Broadcast::NotReady);
        assert!(net.sent.borrow().is_empty());

        peer.record(peer_addr());
        let Broadcast::Sent(n) = broadcaster.broadcast_once().unwrap() else {
            panic!("expected a send");
        };
        assert!(n > 0);
        assert_eq!(net.sent.borrow()[0].1, peer_addr());
    }

    #[test]
    fn report_payload_reflects_state_snapshot() {
        let net = FakeNet::default();
        let vehicle = SharedVehicle::new();
        let peer = PeerSlot::new();
        peer.record(peer_addr());
        let mut broadcaster =
            Broadcaster::new(vehicle.clone(), peer, net.opener()).unwrap();

        vehicle.with(|s| {
            s.actual = crate::state::Motion::Right;
            s.speed = crate::state::SpeedLevel::Low;
        });
        broadcaster.broadcast_once().unwrap();

        let sent = net.sent.borrow();
        let payload = String::from_utf8(sent[0].0.clone()).unwrap();
        assert_eq!(payload, r#"{"status":"right","speed":"low"}"#);
    }

    #[test]
    fn endpoint_is_rebuilt_after_failure_threshold() {
        let net = FakeNet::default();
        let vehicle = SharedVehicle::new();
        let peer = PeerSlot::new();
        peer.record(peer_addr());
        let mut broadcaster = Broadcaster::new(vehicle, peer, net.opener()).unwrap();
        assert_eq!(net.opens.get(), 1);

        net.fail_sends.set(true);
        for i in 1..=MAX_SEND_FAILURES {
            assert!(broadcaster.broadcast_once().is_err());
            assert_eq!(broadcaster.consecutive_failures(), i);
        }
        assert_eq!(net.opens.get(), 1, "no rebuild before the threshold");

        // Next cycle rebuilds first, then sends successfully
        net.fail_sends.set(false);
        let outcome = broadcaster.broadcast_once().unwrap();
        assert!(matches!(outcome, Broadcast::Sent(_)));
        assert_eq!(net.opens.get(), 2, "endpoint recreated once");
        assert_eq!(broadcaster.consecutive_failures(), 0);
    }

    #[test]
    fn failed_rebuild_skips_the_cycle_and_keeps_counting() {
        let net = FakeNet::default();
        let vehicle = SharedVehicle::new();
        let peer = PeerSlot::new();
        peer.record(peer_addr());
        let mut broadcaster = Broadcaster::new(vehicle, peer, net.opener()).unwrap();

        net.fail_sends.set(true);
        for _ in 0..MAX_SEND_FAILURES {
            let _ = broadcaster.broadcast_once();
        }

        net.fail_opens.set(true);
        assert!(matches!(
            broadcaster.broadcast_once(),
            Err(TelemetryError::Bind(_))
        ));
        assert_eq!(broadcaster.consecutive_failures(), MAX_SEND_FAILURES + 1);
        assert_eq!(net.opens.get(), 1);

        // Rebind succeeds again: counter clears and delivery resumes
        net.fail_opens.set(false);
        net.fail_sends.set(false);
        assert!(matches!(
            broadcaster.broadcast_once().unwrap(),
            Broadcast::Sent(_)
        ));
        assert_eq!(broadcaster.consecutive_failures(), 0);
        assert_eq!(net.opens.get(), 2);
    }

    #[test]
    fn initial_bind_failure_is_fatal() {
        let net = FakeNet::default();
        net.fail_opens.set(true);
        let result = Broadcaster::new(SharedVehicle::new(), PeerSlot::new(), net.opener());
        assert!(matches!(result, Err(TelemetryError::Bind(_))));
    }
}
