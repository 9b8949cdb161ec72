//! End-to-end scenarios driving a real `PortActor` through its event queue,
//! a `MemoryDb`-backed `DbWriter`, and (where a scenario needs ICMP evidence)
//! a connected `FakeIcmpTransport` pair standing in for a peer ToR. Each test
//! asserts only the externally observable part — the rows this daemon
//! actually writes back to the database — since the sub-FSM labels
//! themselves are private to the actor.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use uuid::Uuid;

use linkmgrd::db::{Db, MemoryDb};
use linkmgrd::protocol::config::{Tunables, TunablesHandle};
use linkmgrd::protocol::db_writer::DbWriter;
use linkmgrd::protocol::fsm::{LinkStateEvent, MuxConfigMode, MuxStateEvent};
use linkmgrd::protocol::link_prober::payload::Payload;
use linkmgrd::protocol::link_prober::transport::{build_probe_frame, FakeIcmpTransport, FrameParams};
use linkmgrd::protocol::port_actor::{PortActor, PortActorHandle, PortEvent};

const PORT: &str = "Ethernet4";

fn fast_tunables() -> TunablesHandle {
    TunablesHandle::new(Tunables {
        interval_v4_ms: 15,
        suspend_timer_ms: 30,
        ..Tunables::default()
    })
}

fn spawn_actor(tunables: TunablesHandle, mode: MuxConfigMode) -> (PortActorHandle, Arc<MemoryDb>) {
    let db = Arc::new(MemoryDb::new());
    let writer = DbWriter::spawn(db.clone() as Arc<dyn Db>);
    let handle = PortActor::spawn(PORT, writer, tunables, mode);
    (handle, db)
}

fn frame_params() -> FrameParams {
    FrameParams {
        src_mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
        dst_mac: [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb],
        src_ip: Ipv4Addr::new(10, 0, 0, 254),
        dst_ip: Ipv4Addr::new(10, 0, 0, 4),
        ip_id: 1,
        icmp_id: 42,
        icmp_seq: 1,
    }
}

async fn settle() {
    sleep(Duration::from_millis(60)).await;
}

fn enable_link_prober(handle: &PortActorHandle, own_guid: Uuid, transport: FakeIcmpTransport) {
    handle.post(PortEvent::EnableLinkProber {
        transport: Box::new(transport),
        own_guid,
        tor_mac: frame_params().src_mac,
        server_mac: frame_params().dst_mac,
        loopback_ip: frame_params().src_ip,
        blade_ip: frame_params().dst_ip,
    });
}

/// CLI-forced `active` mode bypasses the link prober entirely and never
/// issues a Standby, no matter what the driver reports in the meantime.
#[tokio::test]
async fn forced_active_mode_never_writes_standby_across_flapping_reports() {
    let (handle, db) = spawn_actor(TunablesHandle::default(), MuxConfigMode::Auto);
    handle.post(PortEvent::Config(MuxConfigMode::Active));
    for event in [
        MuxStateEvent::StandbyReport,
        MuxStateEvent::UnknownReport,
        MuxStateEvent::ErrorReport,
        MuxStateEvent::StandbyReport,
    ] {
        handle.post(PortEvent::MuxReport(event));
        settle().await;
    }
    assert_eq!(
        db.hget("APPL_DB/MUX_CABLE", PORT, "state"),
        Some("active".to_string())
    );
}

/// A steady Active/Active/Up port (link prober evidence already agreeing
/// with the driver) issues no mux command at all — only the health row
/// moves to `healthy`.
#[tokio::test]
async fn steady_active_state_writes_health_but_no_mux_command() {
    let tunables = fast_tunables();
    let (handle, db) = spawn_actor(tunables, MuxConfigMode::Auto);
    // Bring the link up first: the MS-FSM starts in `Wait`, and evaluating
    // with `ls=Down` while lp is already settled would otherwise read as a
    // forced failover before the scenario even starts.
    handle.post(PortEvent::LinkState(LinkStateEvent::UpEvent));

    let (actor_side, test_side) = FakeIcmpTransport::pair();
    let own_guid = Uuid::new_v4();
    enable_link_prober(&handle, own_guid, actor_side);
    sleep(Duration::from_millis(5)).await;

    // Our own echo loops back: the link prober claims Active.
    let self_frame = build_probe_frame(&frame_params(), &Payload::new(own_guid));
    test_side.send(&self_frame).unwrap();
    settle().await;

    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::ActiveReport));
    }
    settle().await;

    assert_eq!(
        db.hget("STATE_DB/MUX_LINKMGR", PORT, "state"),
        Some("healthy".to_string())
    );
    assert_eq!(db.hget("APPL_DB/MUX_CABLE", PORT, "state"), None);
}

/// Starting from a steady Active/Active/Up port, the link going down forces
/// an immediate Standby command regardless of link-prober evidence. Once the
/// driver confirms Standby and a peer probe is heard during the outage (the
/// peer ToR has taken over), link recovery finds both the prober and the
/// driver already agreeing on Standby, so no further command is issued.
#[tokio::test]
async fn link_down_from_active_forces_standby_then_stays_quiet_on_recovery() {
    let tunables = fast_tunables();
    let (handle, db) = spawn_actor(tunables, MuxConfigMode::Auto);
    handle.post(PortEvent::LinkState(LinkStateEvent::UpEvent));

    let (actor_side, test_side) = FakeIcmpTransport::pair();
    let own_guid = Uuid::new_v4();
    enable_link_prober(&handle, own_guid, actor_side);
    sleep(Duration::from_millis(5)).await;

    let self_frame = build_probe_frame(&frame_params(), &Payload::new(own_guid));
    test_side.send(&self_frame).unwrap();
    settle().await;

    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::ActiveReport));
    }
    settle().await;

    handle.post(PortEvent::LinkState(LinkStateEvent::DownEvent));
    settle().await;
    assert_eq!(
        db.hget("APPL_DB/MUX_CABLE", PORT, "state"),
        Some("standby".to_string())
    );

    // The peer ToR is now probing continuously with a different GUID; each
    // heard frame both flips (and then keeps pinning) the link prober on
    // Standby by resetting its idle-erosion counter before it can reach the
    // negative retry threshold.
    let peer_frame = build_probe_frame(&frame_params(), &Payload::new(Uuid::new_v4()));
    let brief = Duration::from_millis(25); // well under 3 idle ticks at 15ms

    test_side.send(&peer_frame).unwrap();
    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::StandbyReport));
    }
    sleep(brief).await;
    assert_eq!(
        db.hget("STATE_DB/MUX_LINKMGR", PORT, "state"),
        Some("unhealthy".to_string())
    );

    test_side.send(&peer_frame).unwrap();
    sleep(brief).await;
    handle.post(PortEvent::LinkState(LinkStateEvent::UpEvent));
    test_side.send(&peer_frame).unwrap();
    sleep(brief).await;
    assert_eq!(
        db.hget("APPL_DB/MUX_CABLE", PORT, "state"),
        Some("standby".to_string())
    );
    assert_eq!(
        db.hget("STATE_DB/MUX_LINKMGR", PORT, "state"),
        Some("healthy".to_string())
    );
}

/// Going quiet after a steady Active/Active/Up port (no frames heard at all)
/// eventually drives the link prober to Unknown; per the composite table's
/// rule for (lp=Unknown, ms=Active), that suspends transmission and, once
/// the suspend window expires, issues exactly one probe command.
#[tokio::test]
async fn silence_after_active_steady_eventually_issues_a_probe_command() {
    let tunables = fast_tunables();
    let (handle, db) = spawn_actor(tunables, MuxConfigMode::Auto);
    handle.post(PortEvent::LinkState(LinkStateEvent::UpEvent));

    let (actor_side, test_side) = FakeIcmpTransport::pair();
    let own_guid = Uuid::new_v4();
    enable_link_prober(&handle, own_guid, actor_side);
    sleep(Duration::from_millis(5)).await;

    let self_frame = build_probe_frame(&frame_params(), &Payload::new(own_guid));
    test_side.send(&self_frame).unwrap();
    settle().await;

    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::ActiveReport));
    }
    settle().await;
    assert_eq!(
        db.hget("STATE_DB/MUX_LINKMGR", PORT, "state"),
        Some("healthy".to_string())
    );

    // No more frames arrive: three idle ticks (negative retry = 3 by
    // default) push the link prober back to Unknown, and the 30ms suspend
    // window set by `fast_tunables` expires shortly after.
    sleep(Duration::from_millis(300)).await;

    assert_eq!(
        db.hget("APPL_DB/MUX_CABLE_COMMAND", PORT, "command"),
        Some("probe".to_string())
    );
}

/// Metrics pairing (invariant 5): a `SetMux` issued while the link is down
/// writes a `start` row, and the matching driver confirmation that commits
/// the MS-FSM out of Wait writes the paired `end` row for the same label.
#[tokio::test]
async fn link_down_set_mux_pairs_metrics_start_and_end() {
    let (handle, db) = spawn_actor(TunablesHandle::default(), MuxConfigMode::Auto);
    handle.post(PortEvent::LinkState(LinkStateEvent::UpEvent));
    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::ActiveReport));
    }
    settle().await;

    handle.post(PortEvent::LinkState(LinkStateEvent::DownEvent));
    settle().await;
    assert!(db
        .hget(
            "STATE_DB/MUX_METRICS",
            PORT,
            "linkmgrd_switch_standby_start"
        )
        .is_some());
    assert!(db
        .hget("STATE_DB/MUX_METRICS", PORT, "linkmgrd_switch_standby_end")
        .is_none());

    for _ in 0..3 {
        handle.post(PortEvent::MuxReport(MuxStateEvent::StandbyReport));
    }
    settle().await;
    assert!(db
        .hget("STATE_DB/MUX_METRICS", PORT, "linkmgrd_switch_standby_end")
        .is_some());
}
