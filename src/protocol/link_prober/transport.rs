//! `IcmpTransport` (C3 collaborator): send/receive the raw Ethernet+IP+ICMP
//! frames that carry a [`super::payload::Payload`]. The real backend is a
//! Linux `AF_PACKET` raw socket (hand-built headers, per spec §4.3); the fake
//! backend is an in-memory channel pair used by every test and non-Linux build.

use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};

use super::payload::Payload;

/// A fully-built Ethernet frame ready for transmission, or one received
/// verbatim off the wire. `Bytes` keeps a received frame cheaply cloneable
/// and shareable without an extra copy on the path into [`extract_payload`].
pub type Frame = Bytes;

/// Everything needed to build one probe frame for a given port.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub ip_id: u16,
    pub icmp_id: u16,
    pub icmp_seq: u16,
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_ICMP: u8 = 1;
const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
const ICMP_TYPE_ECHO_REPLY: u8 = 0;

/// Build a complete Ethernet/IPv4/ICMP echo-request frame carrying `payload`.
pub fn build_probe_frame(params: &FrameParams, payload: &Payload) -> Frame {
    let payload_bytes = payload.to_bytes();
    let icmp_len = 8 + payload_bytes.len();
    let ip_len = 20 + icmp_len;
    let mut frame = BytesMut::with_capacity(14 + ip_len);

    frame.extend_from_slice(&params.dst_mac);
    frame.extend_from_slice(&params.src_mac);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let ip_header_start = frame.len();
    frame.extend_from_slice(&[0x45, 0x00]); // version 4 / IHL 5, DSCP/ECN
    frame.extend_from_slice(&(ip_len as u16).to_be_bytes());
    frame.extend_from_slice(&params.ip_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    frame.extend_from_slice(&[64, IP_PROTO_ICMP]); // TTL, protocol
    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    frame.extend_from_slice(&params.src_ip.octets());
    frame.extend_from_slice(&params.dst_ip.octets());
    let ip_checksum = internet_checksum(&frame[ip_header_start..ip_header_start + 20]);
    frame[ip_header_start + 10..ip_header_start + 12].copy_from_slice(&ip_checksum.to_be_bytes());

    let icmp_header_start = frame.len();
    frame.extend_from_slice(&[ICMP_TYPE_ECHO_REQUEST, 0]); // type, code
    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    frame.extend_from_slice(&params.icmp_id.to_be_bytes());
    frame.extend_from_slice(&params.icmp_seq.to_be_bytes());
    frame.extend_from_slice(&payload_bytes);
    let icmp_checksum = internet_checksum(&frame[icmp_header_start..]);
    frame[icmp_header_start + 2..icmp_header_start + 4].copy_from_slice(&icmp_checksum.to_be_bytes());

    frame.freeze()
}

/// Parse a received frame down to its ICMP payload, if it is an ICMP
/// echo-request or echo-reply carrying a full-length payload.
pub fn extract_payload(frame: &[u8]) -> Option<Payload> {
    if frame.len() < 14 + 20 + 8 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip_start = 14;
    let ihl = (frame[ip_start] & 0x0f) as usize * 4;
    if frame[ip_start + 9] != IP_PROTO_ICMP {
        return None;
    }
    let icmp_start = ip_start + ihl;
    if frame.len() < icmp_start + 8 {
        return None;
    }
    let icmp_type = frame[icmp_start];
    if icmp_type != ICMP_TYPE_ECHO_REQUEST && icmp_type != ICMP_TYPE_ECHO_REPLY {
        return None;
    }
    Payload::from_bytes(&frame[icmp_start + 8..])
}

fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Raw send/receive of Ethernet frames for one port's ICMP probing.
pub trait IcmpTransport: Send {
    fn send(&self, frame: &[u8]) -> anyhow::Result<()>;
    /// Non-blocking receive; `Ok(None)` means nothing is pending right now.
    fn try_recv(&self) -> anyhow::Result<Option<Frame>>;
}

#[cfg(target_os = "linux")]
pub use linux::LinuxIcmpTransport;

#[cfg(target_os = "linux")]
mod linux {
    use std::os::fd::AsRawFd;

    use socket2::{Domain, Protocol, Socket, Type};

    use super::{Frame, IcmpTransport};

    /// `AF_PACKET` raw socket bound to one interface, per spec §4.3: headers
    /// are hand-built rather than delegated to the kernel's ICMP stack, since
    /// the destination MAC is the server's resolved MAC, not a routed next-hop.
    pub struct LinuxIcmpTransport {
        socket: Socket,
    }

    impl LinuxIcmpTransport {
        pub fn bind(ifindex: i32) -> anyhow::Result<Self> {
            let socket = Socket::new(
                Domain::PACKET,
                Type::RAW,
                Some(Protocol::from(libc::ETH_P_ALL as i32)),
            )?;
            socket.set_nonblocking(true)?;
            bind_to_ifindex(&socket, ifindex)?;
            Ok(Self { socket })
        }
    }

    fn bind_to_ifindex(socket: &Socket, ifindex: i32) -> anyhow::Result<()> {
        // SAFETY: sockaddr_ll is POD and sized correctly for AF_PACKET bind.
        unsafe {
            let mut addr: libc::sockaddr_ll = std::mem::zeroed();
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
            addr.sll_ifindex = ifindex;
            let ret = libc::bind(
                socket.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            );
            if ret != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    impl IcmpTransport for LinuxIcmpTransport {
        fn send(&self, frame: &[u8]) -> anyhow::Result<()> {
            self.socket.send(frame)?;
            Ok(())
        }

        fn try_recv(&self) -> anyhow::Result<Option<Frame>> {
            let mut buf = [std::mem::MaybeUninit::new(0u8); 2048];
            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    let bytes: Vec<u8> = buf[..n]
                        .iter()
                        .map(|b| unsafe { b.assume_init() })
                        .collect();
                    Ok(Some(Frame::from(bytes)))
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(err.into()),
            }
        }
    }
}

/// In-memory double used by tests and non-Linux builds: two peers can be
/// wired together by sharing the opposite ends of their channels.
pub struct FakeIcmpTransport {
    tx: flume::Sender<Frame>,
    rx: flume::Receiver<Frame>,
}

impl FakeIcmpTransport {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Build a connected pair: frames sent on one side arrive on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = flume::unbounded();
        let (tx_b, rx_b) = flume::unbounded();
        (
            Self { tx: tx_a, rx: rx_b },
            Self { tx: tx_b, rx: rx_a },
        )
    }
}

impl Default for FakeIcmpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IcmpTransport for FakeIcmpTransport {
    fn send(&self, frame: &[u8]) -> anyhow::Result<()> {
        self.tx.send(Frame::copy_from_slice(frame)).ok();
        Ok(())
    }

    fn try_recv(&self) -> anyhow::Result<Option<Frame>> {
        Ok(self.rx.try_recv().ok())
    }
}
