//! Process bootstrap (C11, ambient): logging setup and the daemon's top-level
//! wiring — building the `Db` backend, reading the fail-fast startup facts,
//! constructing the Registry/DbWriter/DB Watcher trio, and driving shutdown.
//! Grounded in the teacher's `boot::init_common`/`start_daemon` split: a tiny
//! logging initializer plus one function that owns the whole run.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::cli::{Args, DbBackend, LogLevel};
use crate::db::{Db, MemoryDb};
#[cfg(feature = "redis-backend")]
use crate::db::RedisDb;
use crate::netlink::NeighborSource;
#[cfg(target_os = "linux")]
use crate::netlink::LinuxNeighborSource;
#[cfg(not(target_os = "linux"))]
use crate::netlink::FakeNeighborSource;
use crate::protocol::config::TunablesHandle;
use crate::protocol::db_watcher;
use crate::protocol::db_writer::DbWriter;
use crate::protocol::link_prober::transport::IcmpTransport;
#[cfg(target_os = "linux")]
use crate::protocol::link_prober::transport::LinuxIcmpTransport;
#[cfg(not(target_os = "linux"))]
use crate::protocol::link_prober::transport::FakeIcmpTransport;
use crate::protocol::registry::Registry;

/// Exit codes per spec §6.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_MISSING: i32 = 2;
}

pub fn init_logging(level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn build_db(args: &Args) -> Result<Arc<dyn Db>> {
    match args.db_backend {
        DbBackend::Memory => Ok(Arc::new(MemoryDb::new())),
        DbBackend::Redis => {
            #[cfg(feature = "redis-backend")]
            {
                let url = args
                    .db_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("--db-backend redis requires --db-url"))?;
                Ok(Arc::new(RedisDb::connect(url)?))
            }
            #[cfg(not(feature = "redis-backend"))]
            {
                anyhow::bail!("built without the `redis-backend` feature")
            }
        }
    }
}

fn build_neighbor_source() -> Result<Box<dyn NeighborSource>> {
    #[cfg(target_os = "linux")]
    {
        return Ok(Box::new(LinuxNeighborSource::bind()?));
    }
    #[cfg(not(target_os = "linux"))]
    {
        log::warn!("non-Linux build: neighbor resolution is a no-op stand-in");
        Ok(Box::new(FakeNeighborSource::new()))
    }
}

/// Builds an `IcmpTransport` for one port name. On Linux this resolves the
/// interface index and binds an `AF_PACKET` socket to it; elsewhere it falls
/// back to an unconnected fake so the rest of the daemon still runs (with no
/// real probing) for local development.
fn build_transport(name: &str) -> Result<Box<dyn IcmpTransport>> {
    #[cfg(target_os = "linux")]
    {
        let ifindex = interface_index(name)?;
        return Ok(Box::new(LinuxIcmpTransport::bind(ifindex)?));
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
        Ok(Box::new(FakeIcmpTransport::new()))
    }
}

#[cfg(target_os = "linux")]
fn interface_index(name: &str) -> Result<i32> {
    let cname = std::ffi::CString::new(name)?;
    // SAFETY: `cname` is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        anyhow::bail!("no such interface: {name}");
    }
    Ok(index as i32)
}

fn read_loopback_ipv4_quiet(db: &dyn Db) -> Option<Ipv4Addr> {
    db_watcher::read_loopback_ipv4(db).ok()
}

/// Runs the daemon until a shutdown signal is received. Returns the process
/// exit code (spec §6): 0 on a clean shutdown, non-zero if the fail-fast
/// startup reads in spec §4.2 never succeed.
pub async fn run(args: Args) -> i32 {
    let db = match build_db(&args) {
        Ok(db) => db,
        Err(err) => {
            log::error!("failed to initialize database backend: {err:#}");
            return exit_code::CONFIG_MISSING;
        }
    };

    let tor_mac = match db_watcher::read_tor_mac(db.as_ref()) {
        Ok(mac) => mac,
        Err(err) => {
            log::error!("startup aborted: {err}");
            return exit_code::CONFIG_MISSING;
        }
    };
    let loopback_ip = match read_loopback_ipv4_quiet(db.as_ref()) {
        Some(ip) => ip,
        None => {
            log::error!(
                "startup aborted: {}",
                db_watcher::StartupError::MissingLoopbackIpv4
            );
            return exit_code::CONFIG_MISSING;
        }
    };
    log::info!(
        "startup facts resolved: tor_mac={}, loopback={loopback_ip}",
        tor_mac
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    );

    let neighbor_source = match build_neighbor_source() {
        Ok(source) => source,
        Err(err) => {
            log::error!("failed to bind neighbor listener: {err:#}");
            return exit_code::CONFIG_MISSING;
        }
    };

    let own_guid = Uuid::new_v4();
    let tunables = TunablesHandle::default();
    let db_writer = DbWriter::spawn(Arc::clone(&db));
    let transport_factory: Arc<
        dyn Fn(&str) -> anyhow::Result<Box<dyn IcmpTransport>> + Send + Sync,
    > = Arc::new(build_transport);

    let registry = Arc::new(Registry::new(
        db_writer,
        tunables.clone(),
        tor_mac,
        loopback_ip,
        own_guid,
        args.default_mode.to_mux_config_mode(),
        transport_factory,
    ));

    // Two independent single-shot channels: one tells the watcher thread to
    // leave its select loop, the other wakes this async task. A flume
    // message is delivered to exactly one receiver, so the watcher and this
    // task each need their own rather than sharing clones of one channel.
    let (watcher_shutdown_tx, watcher_shutdown_rx) = flume::bounded::<()>(1);
    let (main_shutdown_tx, main_shutdown_rx) = flume::bounded::<()>(1);
    let watcher_handle = db_watcher::spawn(
        Arc::clone(&db),
        neighbor_source,
        Arc::clone(&registry),
        tunables,
        watcher_shutdown_rx,
    );

    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        let _ = watcher_shutdown_tx.send(());
        let _ = main_shutdown_tx.send(());
    }) {
        log::warn!("failed to install signal handler: {err}");
    }

    let _ = main_shutdown_rx.recv_async().await;
    registry.shutdown();
    if let Err(err) = watcher_handle.join() {
        log::error!("db watcher thread panicked: {err:?}");
    }
    log::info!("linkmgrd shut down cleanly");
    exit_code::OK
}
