//! PortActor (C8): the single-threaded event queue for one port. Owns the
//! three sub-FSMs, the CompositeFSM, and the port's LinkProber, and
//! serializes every event against them so a sub-FSM transition and the
//! CompositeFSM's re-evaluation are atomic with respect to each other.
//!
//! Grounded in the teacher's `PortRuntimeHandle`/`boot_serial_loop` pair: a
//! dedicated execution context reads a `flume::Receiver` mailbox and a
//! cadence timer in the same loop, rather than a shared thread pool racing
//! over shared state.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};

use super::config::TunablesHandle;
use super::db_writer::DbWriter;
use super::fsm::{
    CompositeAction, CompositeEvent, CompositeFsm, Health, LinkProberEvent, LinkProberFsm,
    LinkStateEvent, LinkStateFsm, MetricsKind, MuxConfigMode, MuxStateEvent, MuxStateFsm,
    MuxStateLabel,
};
use super::link_prober::LinkProber;
use super::link_prober::transport::IcmpTransport;

pub enum PortEvent {
    LinkState(LinkStateEvent),
    /// A driver-reported state from `STATE_DB/MUX_CABLE`.
    MuxReport(MuxStateEvent),
    /// A probe/get round-trip result from `APPL_DB/MUX_CABLE_RESPONSE`.
    MuxResponse(MuxStateLabel),
    Config(MuxConfigMode),
    ServerMacResolved([u8; 6]),
    /// Posted by the registry once blade IP and server MAC are both known
    /// (invariant 3's "ready" half); wires up the port's Link Prober.
    EnableLinkProber {
        transport: Box<dyn IcmpTransport>,
        own_guid: uuid::Uuid,
        tor_mac: [u8; 6],
        server_mac: [u8; 6],
        loopback_ip: Ipv4Addr,
        blade_ip: Ipv4Addr,
    },
    ProberTick,
    SuspendTimerExpired(u64),
    Shutdown,
}

#[derive(Clone)]
pub struct PortActorHandle {
    pub name: Arc<str>,
    tx: Sender<PortEvent>,
}

impl PortActorHandle {
    pub fn post(&self, event: PortEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("port actor '{}' mailbox closed; dropping event", self.name);
        }
    }
}

pub struct PortActor {
    name: Arc<str>,
    lp: LinkProberFsm,
    ms: MuxStateFsm,
    ls: LinkStateFsm,
    composite: CompositeFsm,
    link_prober: Option<LinkProber>,
    db_writer: DbWriter,
    tunables: TunablesHandle,
    suspend_generation: Arc<AtomicU64>,
    rx: Receiver<PortEvent>,
    self_tx: Sender<PortEvent>,
}

impl PortActor {
    /// Spawn the dedicated task and return a handle. `transport` is `None`
    /// until the port's blade IP and resolved server MAC are both known
    /// (invariant 3's "ready" half); the actor still processes config/link
    /// events while waiting.
    pub fn spawn(
        name: impl Into<Arc<str>>,
        db_writer: DbWriter,
        tunables: TunablesHandle,
        default_mode: MuxConfigMode,
    ) -> PortActorHandle {
        let name: Arc<str> = name.into();
        let (tx, rx) = flume::unbounded();
        let snapshot = tunables.snapshot();
        let actor = PortActor {
            name: Arc::clone(&name),
            lp: LinkProberFsm::new(snapshot.link_prober_thresholds()),
            ms: MuxStateFsm::new(snapshot.mux_state_change_retry_count),
            ls: LinkStateFsm::new(snapshot.link_state_change_retry_count),
            composite: CompositeFsm::new(default_mode, snapshot.suspend_timer_ms),
            link_prober: None,
            db_writer,
            tunables,
            suspend_generation: Arc::new(AtomicU64::new(0)),
            rx,
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run());
        PortActorHandle { name, tx }
    }

    async fn run(mut self) {
        let interval_ms = self.tunables.snapshot().interval_v4_ms.max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                event = self.rx.recv_async() => {
                    match event {
                        Ok(PortEvent::Shutdown) | Err(_) => {
                            log::info!("port actor '{}' shutting down", self.name);
                            break;
                        }
                        Ok(event) => self.handle(event),
                    }
                }
                _ = ticker.tick() => {
                    self.handle(PortEvent::ProberTick);
                }
            }
        }
    }

    /// Pull in the latest tunables snapshot before acting on an event, so a
    /// `CONFIG_DB/MUX_LINKMGR` change is observed on this actor's very next
    /// handler invocation rather than only at the next process restart.
    fn refresh_tunables(&mut self) {
        let snapshot = self.tunables.snapshot();
        self.lp.set_thresholds(snapshot.link_prober_thresholds());
        self.ms.set_retry_count(snapshot.mux_state_change_retry_count);
        self.ls.set_retry_count(snapshot.link_state_change_retry_count);
        self.composite.set_suspend_timer_ms(snapshot.suspend_timer_ms);
    }

    fn handle(&mut self, event: PortEvent) {
        self.refresh_tunables();
        match event {
            PortEvent::ProberTick => self.handle_prober_tick(),
            PortEvent::LinkState(ev) => {
                self.ls.handle(ev);
                self.reevaluate();
            }
            PortEvent::MuxReport(ev) => {
                let was_waiting = self.ms.is_waiting();
                let committed = self.ms.handle(ev);
                if was_waiting && !self.ms.is_waiting() {
                    let actions = self.composite.on_mux_committed(committed);
                    self.apply(actions);
                }
                self.reevaluate();
            }
            PortEvent::MuxResponse(label) => {
                let actions = self.composite.on_mux_response(self.lp.label(), label);
                self.apply(actions);
            }
            PortEvent::Config(mode) => {
                let actions = self.composite.handle_event(CompositeEvent::MuxConfig(mode));
                self.apply(actions);
                self.reevaluate();
            }
            PortEvent::ServerMacResolved(mac) => {
                if let Some(prober) = self.link_prober.as_mut() {
                    prober.set_dst_mac(mac);
                }
            }
            PortEvent::EnableLinkProber {
                transport,
                own_guid,
                tor_mac,
                server_mac,
                loopback_ip,
                blade_ip,
            } => {
                self.link_prober = Some(LinkProber::new(
                    transport, own_guid, tor_mac, server_mac, loopback_ip, blade_ip,
                ));
            }
            PortEvent::SuspendTimerExpired(generation) => {
                if generation != self.suspend_generation.load(Ordering::SeqCst) {
                    return; // stale timer, superseded by a later suspend/resume
                }
                if let Some(prober) = self.link_prober.as_mut() {
                    prober.resume();
                }
                let actions = self.composite.handle_event(CompositeEvent::SuspendTimerExpired);
                self.apply(actions);
                self.reevaluate();
            }
            PortEvent::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_prober_tick(&mut self) {
        let Some(prober) = self.link_prober.as_mut() else {
            return;
        };
        if let Err(err) = prober.transmit() {
            log::warn!(
                "port actor '{}' failed to transmit probe ({} total): {err}",
                self.name,
                prober.socket_error_count()
            );
        }
        let events = prober.drain_events();
        let idle = prober.take_idle();
        let mut lp_events: Vec<LinkProberEvent> = events;
        if idle {
            lp_events.push(LinkProberEvent::Unknown);
        }
        for ev in lp_events {
            self.lp.handle(ev);
        }
        self.reevaluate();
    }

    fn reevaluate(&mut self) {
        let actions = self.composite.evaluate(self.lp.label(), self.ms.label(), self.ls.label());
        self.apply(actions);
    }

    fn apply(&mut self, actions: Vec<CompositeAction>) {
        for action in actions {
            match action {
                CompositeAction::SetMux(label) => {
                    self.ms.enter_wait();
                    self.db_writer.set_mux_state(&self.name, label);
                }
                CompositeAction::ProbeMux => {
                    self.ms.enter_wait();
                    self.db_writer.probe_mux_state(&self.name);
                }
                CompositeAction::GetMux => {
                    if let Some(label) = self.db_writer.get_mux_state(&self.name) {
                        let _ = self.self_tx.send(PortEvent::MuxResponse(label));
                    }
                }
                CompositeAction::SuspendLinkProberTx(ms) => {
                    if let Some(prober) = self.link_prober.as_mut() {
                        prober.suspend();
                    }
                    let generation = self.suspend_generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let tx = self.self_tx.clone();
                    let gen_counter = Arc::clone(&self.suspend_generation);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        if gen_counter.load(Ordering::SeqCst) == generation {
                            let _ = tx.send(PortEvent::SuspendTimerExpired(generation));
                        }
                    });
                }
                CompositeAction::PostMetrics(kind, label) => {
                    self.db_writer.post_metrics(&self.name, kind, label);
                }
                CompositeAction::SetLinkmgrHealth(health) => {
                    self.db_writer.set_linkmgr_health(&self.name, health);
                }
            }
        }
    }
}
