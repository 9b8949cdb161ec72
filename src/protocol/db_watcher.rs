//! DB Watcher (C2): one dedicated thread multiplexing six notification
//! sources plus a 1-second idle tick, demultiplexing each into the Registry
//! operation it names (spec §4.2, §6). Runs on its own `std::thread`, the
//! way the teacher isolates blocking I/O loops (`boot_serial_loop`) off the
//! async runtime rather than forcing them into an executor.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::db::{Db, DbNotification};
use crate::netlink::{NeighborEvent, NeighborSource};
use crate::protocol::fsm::{MuxConfigMode, MuxStateLabel};

use super::config::TunablesHandle;
use super::registry::Registry;

const IDLE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("DEVICE_METADATA|localhost has no 'mac' field")]
    MissingTorMac,
    #[error("CONFIG_DB/LOOPBACK_INTERFACE has no IPv4 address for Loopback2")]
    MissingLoopbackIpv4,
    #[error("malformed MAC address {0:?}")]
    MalformedMac(String),
}

/// Blocking fail-fast read of the ToR MAC, per spec §4.2's startup sequence.
pub fn read_tor_mac(db: &dyn Db) -> Result<[u8; 6], StartupError> {
    let raw = db
        .hget("CONFIG_DB/DEVICE_METADATA", "localhost", "mac")
        .ok_or(StartupError::MissingTorMac)?;
    parse_mac(&raw).ok_or_else(|| StartupError::MalformedMac(raw))
}

/// Blocking fail-fast read of the Loopback2 IPv4 address.
pub fn read_loopback_ipv4(db: &dyn Db) -> Result<Ipv4Addr, StartupError> {
    db.keys("CONFIG_DB/LOOPBACK_INTERFACE")
        .into_iter()
        .filter(|key| key.starts_with("Loopback2|"))
        .find_map(|key| {
            key.split_once('|')
                .and_then(|(_, prefix)| prefix.split('/').next())
                .and_then(|addr| Ipv4Addr::from_str(addr).ok())
        })
        .ok_or(StartupError::MissingLoopbackIpv4)
}

fn parse_mac(raw: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = raw.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

fn parse_label(value: &str) -> Option<MuxStateLabel> {
    match value {
        "active" => Some(MuxStateLabel::Active),
        "standby" => Some(MuxStateLabel::Standby),
        "unknown" => Some(MuxStateLabel::Unknown),
        "error" => Some(MuxStateLabel::Error),
        _ => None,
    }
}

fn parse_mode(value: &str) -> Option<MuxConfigMode> {
    match value {
        "auto" => Some(MuxConfigMode::Auto),
        "active" => Some(MuxConfigMode::Active),
        "manual" => Some(MuxConfigMode::Manual),
        _ => None,
    }
}

/// Spawn the watcher thread. Seeds the port set from `CONFIG_DB/MUX_CABLE`
/// before entering the select loop, per the startup sequence in §4.2.
pub fn spawn(
    db: Arc<dyn Db>,
    neighbor_source: Box<dyn NeighborSource>,
    registry: Arc<Registry>,
    tunables: TunablesHandle,
    shutdown: flume::Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("db-watcher".into())
        .spawn(move || run(db, neighbor_source, registry, tunables, shutdown))
        .expect("failed to spawn db-watcher thread")
}

fn run(
    db: Arc<dyn Db>,
    neighbor_source: Box<dyn NeighborSource>,
    registry: Arc<Registry>,
    tunables: TunablesHandle,
    shutdown: flume::Receiver<()>,
) {
    for key in db.keys("CONFIG_DB/MUX_CABLE") {
        if let Some(ip) = db
            .hget("CONFIG_DB/MUX_CABLE", &key, "server_ipv4")
            .and_then(|raw| Ipv4Addr::from_str(&raw).ok())
        {
            registry.add_or_update_port(&key, ip);
        }
        if let Some(mode) = db
            .hget("CONFIG_DB/MUX_CABLE", &key, "state")
            .as_deref()
            .and_then(parse_mode)
        {
            registry.update_config(&key, mode);
        }
    }

    let linkmgr_rx = db.subscribe("CONFIG_DB/MUX_LINKMGR");
    let mux_cable_cfg_rx = db.subscribe("CONFIG_DB/MUX_CABLE");
    let port_table_rx = db.subscribe("APPL_DB/PORT_TABLE");
    let mux_response_rx = db.subscribe("APPL_DB/MUX_CABLE_RESPONSE");
    let mux_state_rx = db.subscribe("STATE_DB/MUX_CABLE");
    let neighbor_rx = neighbor_source.events();
    if let Err(err) = neighbor_source.request_dump() {
        log::warn!("failed to request initial neighbor dump: {err}");
    }

    log::info!("db watcher entering select loop");
    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }
        let mut did_work = false;

        while let Ok(n) = linkmgr_rx.try_recv() {
            did_work = true;
            handle_linkmgr_config(&tunables, &n);
        }
        while let Ok(n) = mux_cable_cfg_rx.try_recv() {
            did_work = true;
            handle_mux_cable_config(&registry, &n);
        }
        while let Ok(n) = port_table_rx.try_recv() {
            did_work = true;
            if n.field == "oper_status" {
                match n.value.as_deref() {
                    Some("up") => registry.update_link_state(&n.key, true),
                    Some("down") => registry.update_link_state(&n.key, false),
                    _ => log::warn!("APPL_DB/PORT_TABLE[{}] unparsable oper_status", n.key),
                }
            }
        }
        while let Ok(n) = mux_response_rx.try_recv() {
            did_work = true;
            if n.field == "response" {
                match n.value.as_deref().and_then(parse_label) {
                    Some(label) => {
                        registry.update_mux_response(&n.key, label);
                        db.hdel("APPL_DB/MUX_CABLE_RESPONSE", &n.key, "response");
                    }
                    None => log::warn!("APPL_DB/MUX_CABLE_RESPONSE[{}] unparsable response", n.key),
                }
            }
        }
        while let Ok(n) = mux_state_rx.try_recv() {
            did_work = true;
            if n.field == "state" {
                match n.value.as_deref().and_then(parse_label) {
                    Some(label) => registry.update_mux_state(&n.key, label),
                    None => log::warn!("STATE_DB/MUX_CABLE[{}] unparsable state", n.key),
                }
            }
        }
        while let Ok(event) = neighbor_rx.try_recv() {
            did_work = true;
            match event {
                NeighborEvent::Learned { ipv4, mac } => registry.update_server_mac(ipv4, mac),
                NeighborEvent::Retracted { .. } => {}
            }
        }

        if !did_work {
            std::thread::sleep(IDLE_TICK);
        }
    }
    log::info!("db watcher shut down");
}

/// Apply one field of `CONFIG_DB/MUX_LINKMGR|LINK_PROBER` to the shared
/// tunables snapshot. Per spec §4.2, unknown fields are ignored; a single
/// malformed value is logged and dropped without disturbing the rest of the
/// snapshot, since `TunablesHandle::replace` swaps the whole struct at once
/// (no torn reads) but this function only ever changes one field per call.
fn handle_linkmgr_config(tunables: &TunablesHandle, n: &DbNotification) {
    let Some(raw) = n.value.as_deref() else {
        return;
    };
    let mut next = tunables.snapshot();
    let parsed: Option<()> = match n.field.as_str() {
        "interval_v4" => raw.parse().ok().map(|v| next.interval_v4_ms = v),
        "interval_v6" => raw.parse().ok().map(|v| next.interval_v6_ms = v),
        "positive_signal_count" => raw.parse().ok().map(|v| next.positive_signal_count = v),
        "negative_signal_count" => raw.parse().ok().map(|v| next.negative_signal_count = v),
        "suspend_timer" => raw.parse().ok().map(|v| next.suspend_timer_ms = v),
        _ => return,
    };
    match parsed {
        Some(()) => tunables.replace(next),
        None => log::warn!(
            "CONFIG_DB/MUX_LINKMGR[{}].{} unparsable value {raw:?}",
            n.key,
            n.field
        ),
    }
}

fn handle_mux_cable_config(registry: &Arc<Registry>, n: &DbNotification) {
    match n.field.as_str() {
        "server_ipv4" => {
            if let Some(ip) = n.value.as_deref().and_then(|v| Ipv4Addr::from_str(v).ok()) {
                registry.add_or_update_port(&n.key, ip);
            } else {
                log::warn!("CONFIG_DB/MUX_CABLE[{}] unparsable server_ipv4", n.key);
            }
        }
        "state" => match n.value.as_deref().and_then(parse_mode) {
            Some(mode) => registry.update_config(&n.key, mode),
            None => log::warn!("CONFIG_DB/MUX_CABLE[{}] unparsable mode", n.key),
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_separated_mac() {
        assert_eq!(
            parse_mac("aa:bb:cc:dd:ee:ff"),
            Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        );
        assert_eq!(parse_mac("not-a-mac"), None);
    }

    #[test]
    fn loopback_lookup_picks_the_v4_prefixed_key() {
        let db = crate::db::MemoryDb::new();
        db.hset("CONFIG_DB/LOOPBACK_INTERFACE", "Loopback2|10.1.0.32/32", "NULL", "NULL");
        assert_eq!(read_loopback_ipv4(&db).unwrap(), Ipv4Addr::new(10, 1, 0, 32));
    }

    #[test]
    fn missing_tor_mac_is_reported_as_startup_error() {
        let db = crate::db::MemoryDb::new();
        assert!(matches!(read_tor_mac(&db), Err(StartupError::MissingTorMac)));
    }

    #[test]
    fn malformed_tor_mac_is_distinguished_from_missing() {
        let db = crate::db::MemoryDb::new();
        db.hset("CONFIG_DB/DEVICE_METADATA", "localhost", "mac", "not-a-mac");
        assert!(matches!(
            read_tor_mac(&db),
            Err(StartupError::MalformedMac(raw)) if raw == "not-a-mac"
        ));
    }
}
