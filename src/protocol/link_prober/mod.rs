//! Link Prober (C3): per-port ICMP sender/receiver producing Self/Peer/Unknown
//! events for the LP-FSM. Owned by a [`super::port_actor::PortActor`], which
//! drives its transmit cadence and drains its receive path from its own
//! event queue so the two never race.

pub mod payload;
pub mod transport;

use std::net::Ipv4Addr;

use uuid::Uuid;

use self::payload::{classify, Classification, Payload};
use self::transport::{build_probe_frame, extract_payload, FrameParams, IcmpTransport};
use super::fsm::LinkProberEvent;

pub struct LinkProber {
    transport: Box<dyn IcmpTransport>,
    own_guid: Uuid,
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    icmp_id: u16,
    ip_id_counter: u16,
    icmp_seq_counter: u16,
    suspended: bool,
    /// Set once any frame has been classified since the last [`LinkProber::transmit`].
    heard_since_last_tick: bool,
    /// Per spec §7's SocketError handling: transient send/recv failures are
    /// logged and counted rather than treated as fatal; retried on the next tick.
    socket_error_count: u64,
}

impl LinkProber {
    pub fn new(
        transport: Box<dyn IcmpTransport>,
        own_guid: Uuid,
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
    ) -> Self {
        let icmp_id = icmp_id_from_server_mac(dst_mac);
        Self {
            transport,
            own_guid,
            src_mac,
            dst_mac,
            src_ip,
            dst_ip,
            icmp_id,
            ip_id_counter: 0,
            icmp_seq_counter: 0,
            suspended: false,
            heard_since_last_tick: false,
            socket_error_count: 0,
        }
    }

    /// Count of send/receive failures observed so far (spec §7 SocketError).
    pub fn socket_error_count(&self) -> u64 {
        self.socket_error_count
    }

    /// Installs the resolved server MAC and recomputes `icmp_id` from it
    /// (spec §4.3: "ICMP id = lower 16 bits of server MAC"), since the ICMP
    /// id is only a placeholder until the netlink listener resolves the
    /// real server MAC at port-ready time.
    pub fn set_dst_mac(&mut self, mac: [u8; 6]) {
        self.dst_mac = mac;
        self.icmp_id = icmp_id_from_server_mac(mac);
    }

    /// Per spec §4.3: transmits iff not suspended. The "ready" half of
    /// invariant 3 (blade IP + server MAC known) is enforced by the caller,
    /// which only constructs a `LinkProber` once both are resolved.
    pub fn transmit(&mut self) -> anyhow::Result<()> {
        if self.suspended {
            return Ok(());
        }
        let params = FrameParams {
            src_mac: self.src_mac,
            dst_mac: self.dst_mac,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            ip_id: self.ip_id_counter,
            icmp_id: self.icmp_id,
            icmp_seq: self.icmp_seq_counter,
        };
        self.ip_id_counter = self.ip_id_counter.wrapping_add(1);
        self.icmp_seq_counter = self.icmp_seq_counter.wrapping_add(1);
        let frame = build_probe_frame(&params, &Payload::new(self.own_guid));
        if let Err(err) = self.transport.send(&frame) {
            self.socket_error_count += 1;
            return Err(err);
        }
        self.heard_since_last_tick = false;
        Ok(())
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Drain every frame currently buffered in the transport and classify it.
    pub fn drain_events(&mut self) -> Vec<LinkProberEvent> {
        let mut events = Vec::new();
        loop {
            match self.transport.try_recv() {
                Ok(Some(frame)) => {
                    self.heard_since_last_tick = true;
                    let parsed = extract_payload(&frame);
                    let classification = classify(parsed.as_ref(), &self.own_guid);
                    events.push(match classification {
                        Classification::SelfEcho => LinkProberEvent::Self_,
                        Classification::Peer => LinkProberEvent::Peer,
                        Classification::Unknown => LinkProberEvent::Unknown,
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    self.socket_error_count += 1;
                    log::warn!("link prober receive error: {err}");
                    break;
                }
            }
        }
        events
    }

    /// Called by the cadence timer just before the next [`transmit`]: if
    /// nothing at all was received in the prior interval, the caller should
    /// feed one extra [`LinkProberEvent::Unknown`] into the LP-FSM.
    pub fn take_idle(&mut self) -> bool {
        let idle = !self.heard_since_last_tick;
        self.heard_since_last_tick = false;
        idle
    }
}

/// Spec §4.3: "ICMP id = lower 16 bits of server MAC".
fn icmp_id_from_server_mac(server_mac: [u8; 6]) -> u16 {
    u16::from_be_bytes([server_mac[4], server_mac[5]])
}

#[cfg(test)]
mod tests {
    use super::transport::FakeIcmpTransport;
    use super::*;

    fn prober(transport: FakeIcmpTransport, guid: Uuid) -> LinkProber {
        LinkProber::new(
            Box::new(transport),
            guid,
            [0, 1, 2, 3, 4, 5],
            [6, 7, 8, 9, 10, 11],
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
    }

    /// ICMP id offset within a built frame: 14 (Ethernet) + 20 (IPv4, no
    /// options) + 4 (ICMP type/code/checksum) = 38.
    fn icmp_id_of(frame: &[u8]) -> u16 {
        u16::from_be_bytes([frame[38], frame[39]])
    }

    #[test]
    fn icmp_id_is_derived_from_server_mac_not_tor_mac() {
        let (tx_side, rx_side) = FakeIcmpTransport::pair();
        let tor_mac = [0, 1, 2, 3, 4, 5];
        let server_mac = [6, 7, 8, 9, 10, 11];
        let mut sender = LinkProber::new(
            Box::new(tx_side),
            Uuid::new_v4(),
            tor_mac,
            server_mac,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        sender.transmit().unwrap();
        let frame = rx_side.try_recv().unwrap().expect("frame was sent");
        assert_eq!(icmp_id_of(&frame), u16::from_be_bytes([server_mac[4], server_mac[5]]));
        assert_ne!(icmp_id_of(&frame), u16::from_be_bytes([tor_mac[4], tor_mac[5]]));
    }

    #[test]
    fn set_dst_mac_recomputes_icmp_id() {
        let (tx_side, rx_side) = FakeIcmpTransport::pair();
        let mut sender = prober(tx_side, Uuid::new_v4());
        let resolved_mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        sender.set_dst_mac(resolved_mac);
        sender.transmit().unwrap();
        let frame = rx_side.try_recv().unwrap().expect("frame was sent");
        assert_eq!(
            icmp_id_of(&frame),
            u16::from_be_bytes([resolved_mac[4], resolved_mac[5]])
        );
    }

    #[test]
    fn suspended_prober_does_not_transmit() {
        let (tx_side, rx_side) = FakeIcmpTransport::pair();
        let mut sender = prober(tx_side, Uuid::new_v4());
        sender.suspend();
        sender.transmit().unwrap();
        assert_eq!(rx_side.try_recv().unwrap(), None);
    }

    #[test]
    fn peer_probe_is_classified_as_peer_event() {
        let (a, b) = FakeIcmpTransport::pair();
        let guid_a = Uuid::new_v4();
        let guid_b = Uuid::new_v4();
        let mut prober_a = prober(a, guid_a);
        let mut prober_b = prober(b, guid_b);

        prober_a.transmit().unwrap();
        let events = prober_b.drain_events();
        assert_eq!(events, vec![LinkProberEvent::Peer]);
    }

    #[test]
    fn self_echo_is_classified_as_self_event() {
        let (a, b) = FakeIcmpTransport::pair();
        let guid = Uuid::new_v4();
        let mut sender = prober(a, guid);
        let mut receiver = prober(b, guid);

        sender.transmit().unwrap();
        let events = receiver.drain_events();
        assert_eq!(events, vec![LinkProberEvent::Self_]);
    }

    #[test]
    fn idle_interval_with_no_frames_is_reported() {
        let (_a, b) = FakeIcmpTransport::pair();
        let mut receiver = prober(b, Uuid::new_v4());
        assert!(receiver.drain_events().is_empty());
        assert!(receiver.take_idle());
    }

    struct FailingTransport;

    impl transport::IcmpTransport for FailingTransport {
        fn send(&self, _frame: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("simulated send failure")
        }

        fn try_recv(&self) -> anyhow::Result<Option<transport::Frame>> {
            Ok(None)
        }
    }

    #[test]
    fn transmit_failure_is_logged_and_counted_not_fatal_to_the_caller() {
        let mut prober = LinkProber::new(
            Box::new(FailingTransport),
            Uuid::new_v4(),
            [0, 1, 2, 3, 4, 5],
            [6, 7, 8, 9, 10, 11],
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        assert_eq!(prober.socket_error_count(), 0);
        assert!(prober.transmit().is_err());
        assert_eq!(prober.socket_error_count(), 1);
        assert!(prober.transmit().is_err());
        assert_eq!(prober.socket_error_count(), 2);
    }
}
