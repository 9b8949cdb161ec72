//! Port Registry (C1): holds global and per-port configuration, and owns the
//! `port -> PortActor` map. Each public operation locates (or lazily
//! creates) the owning `PortActor` and posts the corresponding event; calls
//! return immediately, per spec §4.1.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::config::TunablesHandle;
use super::db_writer::DbWriter;
use super::fsm::{LinkStateEvent, MuxConfigMode, MuxStateEvent, MuxStateLabel};
use super::link_prober::transport::IcmpTransport;
use super::port_actor::{PortActor, PortActorHandle, PortEvent};

/// What the registry knows about a port beyond its `PortActor` handle: the
/// pieces needed to decide when the Link Prober becomes "ready" (invariant
/// 3) and to build its transport.
struct PortRecord {
    handle: PortActorHandle,
    server_ipv4: Option<Ipv4Addr>,
    server_mac: Option<[u8; 6]>,
    prober_enabled: bool,
}

pub struct Registry {
    ports: RwLock<HashMap<String, PortRecord>>,
    db_writer: DbWriter,
    tunables: TunablesHandle,
    tor_mac: [u8; 6],
    loopback_ip: Ipv4Addr,
    own_guid: Uuid,
    /// `-m auto|active|manual`: the CLI-forced mode newly discovered ports
    /// start in, before `CONFIG_DB/MUX_CABLE`'s per-port `state` field (if
    /// any) overrides it.
    default_mode: MuxConfigMode,
    transport_factory: Arc<dyn Fn(&str) -> anyhow::Result<Box<dyn IcmpTransport>> + Send + Sync>,
}

impl Registry {
    pub fn new(
        db_writer: DbWriter,
        tunables: TunablesHandle,
        tor_mac: [u8; 6],
        loopback_ip: Ipv4Addr,
        own_guid: Uuid,
        default_mode: MuxConfigMode,
        transport_factory: Arc<dyn Fn(&str) -> anyhow::Result<Box<dyn IcmpTransport>> + Send + Sync>,
    ) -> Self {
        Self {
            ports: RwLock::new(HashMap::new()),
            db_writer,
            tunables,
            tor_mac,
            loopback_ip,
            own_guid,
            default_mode,
            transport_factory,
        }
    }

    fn get_or_create(&self, name: &str) -> PortActorHandle {
        if let Some(record) = self.ports.read().get(name) {
            return record.handle.clone();
        }
        let mut ports = self.ports.write();
        ports
            .entry(name.to_string())
            .or_insert_with(|| {
                log::info!("creating port actor for '{name}'");
                let handle = PortActor::spawn(
                    name.to_string(),
                    self.db_writer.clone(),
                    self.tunables.clone(),
                    self.default_mode,
                );
                PortRecord {
                    handle,
                    server_ipv4: None,
                    server_mac: None,
                    prober_enabled: false,
                }
            })
            .handle
            .clone()
    }

    pub fn add_or_update_port(&self, name: &str, server_ipv4: Ipv4Addr) {
        self.get_or_create(name);
        let mut ports = self.ports.write();
        if let Some(record) = ports.get_mut(name) {
            record.server_ipv4 = Some(server_ipv4);
        }
        drop(ports);
        self.maybe_enable_prober(name);
    }

    pub fn update_config(&self, name: &str, mode: MuxConfigMode) {
        let handle = self.get_or_create(name);
        handle.post(PortEvent::Config(mode));
    }

    pub fn update_link_state(&self, name: &str, up: bool) {
        let handle = self.get_or_create(name);
        let event = if up {
            LinkStateEvent::UpEvent
        } else {
            LinkStateEvent::DownEvent
        };
        handle.post(PortEvent::LinkState(event));
    }

    pub fn update_mux_state(&self, name: &str, label: MuxStateLabel) {
        let handle = self.get_or_create(name);
        handle.post(PortEvent::MuxReport(report_event(label)));
    }

    pub fn update_mux_response(&self, name: &str, label: MuxStateLabel) {
        let handle = self.get_or_create(name);
        handle.post(PortEvent::MuxResponse(label));
    }

    pub fn update_server_mac(&self, server_ipv4: Ipv4Addr, mac: [u8; 6]) {
        let names: Vec<String> = {
            let ports = self.ports.read();
            ports
                .iter()
                .filter(|(_, record)| record.server_ipv4 == Some(server_ipv4))
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            {
                let mut ports = self.ports.write();
                if let Some(record) = ports.get_mut(&name) {
                    record.server_mac = Some(mac);
                }
            }
            if let Some(record) = self.ports.read().get(&name) {
                record.handle.post(PortEvent::ServerMacResolved(mac));
            }
            self.maybe_enable_prober(&name);
        }
    }

    fn maybe_enable_prober(&self, name: &str) {
        let (handle, server_ipv4, server_mac, already_enabled) = {
            let ports = self.ports.read();
            let Some(record) = ports.get(name) else {
                return;
            };
            (
                record.handle.clone(),
                record.server_ipv4,
                record.server_mac,
                record.prober_enabled,
            )
        };
        if already_enabled {
            return;
        }
        let (Some(blade_ip), Some(server_mac)) = (server_ipv4, server_mac) else {
            return;
        };
        let transport = match (self.transport_factory)(name) {
            Ok(transport) => transport,
            Err(err) => {
                log::warn!("failed to build ICMP transport for '{name}': {err}");
                return;
            }
        };
        {
            let mut ports = self.ports.write();
            if let Some(record) = ports.get_mut(name) {
                record.prober_enabled = true;
            }
        }
        handle.post(PortEvent::EnableLinkProber {
            transport,
            own_guid: self.own_guid,
            tor_mac: self.tor_mac,
            server_mac,
            loopback_ip: self.loopback_ip,
            blade_ip,
        });
    }

    pub fn shutdown(&self) {
        let ports = self.ports.read();
        for record in ports.values() {
            record.handle.post(PortEvent::Shutdown);
        }
    }
}

fn report_event(label: MuxStateLabel) -> MuxStateEvent {
    match label {
        MuxStateLabel::Active => MuxStateEvent::ActiveReport,
        MuxStateLabel::Standby => MuxStateEvent::StandbyReport,
        MuxStateLabel::Unknown => MuxStateEvent::UnknownReport,
        MuxStateLabel::Error => MuxStateEvent::ErrorReport,
        MuxStateLabel::Wait => MuxStateEvent::UnknownReport,
    }
}
