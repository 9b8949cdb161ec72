//! `NeighborSource` (C2 collaborator): resolves the server-side MAC address
//! for a blade IPv4 via the kernel neighbor table, matching the design's
//! `RTNLGRP_NEIGH` listener. `LinuxNeighborSource` is the real backend;
//! `FakeNeighborSource` is a channel-driven stand-in for tests and non-Linux
//! builds, following the same trait-plus-fake split as `Db`/`IcmpTransport`.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxNeighborSource;

use std::net::Ipv4Addr;

use flume::{Receiver, Sender};

/// A learned or retracted neighbor-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborEvent {
    Learned { ipv4: Ipv4Addr, mac: [u8; 6] },
    Retracted { ipv4: Ipv4Addr },
}

/// Source of neighbor-table changes. Implementations push [`NeighborEvent`]s
/// as they arrive; the DB Watcher drains them on its select loop.
pub trait NeighborSource: Send {
    fn events(&self) -> Receiver<NeighborEvent>;
    /// Request a full dump (RTM_GETNEIGH) to seed already-resolved neighbors.
    fn request_dump(&self) -> anyhow::Result<()>;
}

/// Test/non-Linux double: entries are injected directly via [`inject`].
pub struct FakeNeighborSource {
    tx: Sender<NeighborEvent>,
    rx: Receiver<NeighborEvent>,
}

impl FakeNeighborSource {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn inject(&self, event: NeighborEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for FakeNeighborSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborSource for FakeNeighborSource {
    fn events(&self) -> Receiver<NeighborEvent> {
        self.rx.clone()
    }

    fn request_dump(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
