//! CompositeFSM (spec §4.7): fuses (LP, MS, LS) labels into a single
//! deterministic health/role decision and a set of side-effecting actions.
//!
//! Design rationale: each signal alone is insufficient. The MUX driver's
//! report can disagree with probe evidence (hardware toggled by the peer);
//! link-down invalidates probe evidence; a CLI-forced "active" must override
//! probe-driven churn. Fusing all three in one table keeps every cross-layer
//! policy decision in one place instead of scattered across the sub-FSMs.

use super::{LinkProberLabel, LinkStateLabel, MuxStateLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MuxConfigMode {
    Auto,
    Active,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeEvent {
    MuxConfig(MuxConfigMode),
    SuspendTimerExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MetricsKind {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeAction {
    SetMux(MuxStateLabel),
    ProbeMux,
    GetMux,
    SuspendLinkProberTx(u64),
    PostMetrics(MetricsKind, MuxStateLabel),
    SetLinkmgrHealth(super::Health),
}

/// Holds the policy state that isn't captured by the three sub-FSM labels
/// alone: the CLI-forced mode, whether a suspend-tx window is outstanding,
/// and the switching-metrics pairing bookkeeping (invariant 5: exactly one
/// `start` per `start`/`end` pair, cleared on every new start).
#[derive(Debug, Clone)]
pub struct CompositeFsm {
    mode: MuxConfigMode,
    suspending: bool,
    metrics_pending: Option<MuxStateLabel>,
    last_health: Option<super::Health>,
    suspend_timer_ms: u64,
}

impl CompositeFsm {
    pub fn new(mode: MuxConfigMode, suspend_timer_ms: u64) -> Self {
        Self {
            mode,
            suspending: false,
            metrics_pending: None,
            last_health: None,
            suspend_timer_ms,
        }
    }

    pub fn mode(&self) -> MuxConfigMode {
        self.mode
    }

    pub fn set_suspend_timer_ms(&mut self, ms: u64) {
        self.suspend_timer_ms = ms;
    }

    /// Handle a composite-only event (not routed through a sub-FSM). Returns
    /// any actions that follow immediately from the event itself, before the
    /// next `evaluate` call re-examines the fused labels.
    pub fn handle_event(&mut self, event: CompositeEvent) -> Vec<CompositeAction> {
        match event {
            CompositeEvent::MuxConfig(mode) => {
                self.mode = mode;
                Vec::new()
            }
            CompositeEvent::SuspendTimerExpired => {
                // Idempotent: a timer that fires after suspension was already
                // cleared (e.g. link flapped back down and up) is a no-op.
                if self.suspending {
                    self.suspending = false;
                    vec![CompositeAction::ProbeMux]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Re-evaluate the fused state after any sub-FSM transition and return
    /// the actions the PortActor must effect. Called after every event that
    /// changed (or confirmed) one of the three labels.
    pub fn evaluate(
        &mut self,
        lp: LinkProberLabel,
        ms: MuxStateLabel,
        ls: LinkStateLabel,
    ) -> Vec<CompositeAction> {
        use LinkProberLabel as Lp;
        use LinkStateLabel as Ls;
        use MuxStateLabel as Ms;

        let mut actions = Vec::new();
        let health = self.derive_health(lp, ms, ls);
        if self.last_health != Some(health) {
            self.last_health = Some(health);
            actions.push(CompositeAction::SetLinkmgrHealth(health));
        }

        match self.mode {
            MuxConfigMode::Manual => return actions,
            MuxConfigMode::Active => {
                if ms != Ms::Active {
                    self.request_set(Ms::Active, &mut actions);
                }
                return actions;
            }
            MuxConfigMode::Auto => {}
        }

        if ls == Ls::Down {
            if (lp == Lp::Active || ms == Ms::Active) && ms != Ms::Standby {
                self.request_set(Ms::Standby, &mut actions);
            }
            return actions;
        }

        match (lp, ms) {
            (Lp::Active, Ms::Active) | (Lp::Standby, Ms::Standby) => {}
            (Lp::Active, Ms::Standby) | (Lp::Active, Ms::Unknown) => {
                actions.push(CompositeAction::GetMux);
            }
            (Lp::Standby, Ms::Active) | (Lp::Standby, Ms::Unknown) => {
                actions.push(CompositeAction::GetMux);
            }
            (Lp::Unknown, Ms::Active) => {
                if !self.suspending {
                    self.suspending = true;
                    actions.push(CompositeAction::SuspendLinkProberTx(self.suspend_timer_ms));
                }
            }
            (Lp::Unknown, Ms::Standby) | (Lp::Unknown, Ms::Unknown) => {
                self.request_set(Ms::Active, &mut actions);
            }
            (_, Ms::Error) => {
                actions.push(CompositeAction::ProbeMux);
            }
            (_, Ms::Wait) => {}
        }

        actions
    }

    /// Apply a [`MuxProbeResponse`]/[`MuxGetResponse`]-style result once it has
    /// been classified by the caller as agreeing or disagreeing with `lp`:
    /// still goes through the normal MS-FSM report path, this only decides
    /// whether a `SetMux` must follow to reclaim the port.
    pub fn on_mux_response(
        &mut self,
        lp: LinkProberLabel,
        reported: MuxStateLabel,
    ) -> Vec<CompositeAction> {
        use LinkProberLabel as Lp;
        use MuxStateLabel as Ms;
        let mut actions = Vec::new();
        let wanted = match lp {
            Lp::Active => Ms::Active,
            Lp::Standby => Ms::Standby,
            Lp::Unknown => return actions,
        };
        if reported != wanted {
            self.request_set(wanted, &mut actions);
        }
        actions
    }

    /// Issue `SetMux(label)` unless a Set for the same label is already
    /// outstanding (invariant 4: at most one pending Set per port). A
    /// different label preempts the pending one, per invariant 4's
    /// coalesce-to-latest rule.
    fn request_set(&mut self, label: MuxStateLabel, actions: &mut Vec<CompositeAction>) {
        if self.metrics_pending == Some(label) {
            return;
        }
        self.metrics_pending = Some(label);
        actions.push(CompositeAction::PostMetrics(MetricsKind::Start, label));
        actions.push(CompositeAction::SetMux(label));
    }

    /// Called once the MS-FSM commits out of Wait into `committed`. Emits the
    /// paired `end` metric if a `start` was pending for this port.
    pub fn on_mux_committed(&mut self, committed: MuxStateLabel) -> Vec<CompositeAction> {
        if self.metrics_pending.take().is_some() {
            vec![CompositeAction::PostMetrics(MetricsKind::End, committed)]
        } else {
            Vec::new()
        }
    }

    fn derive_health(
        &self,
        lp: LinkProberLabel,
        ms: MuxStateLabel,
        ls: LinkStateLabel,
    ) -> super::Health {
        use super::Health;
        use LinkProberLabel as Lp;
        use LinkStateLabel as Ls;
        use MuxStateLabel as Ms;
        if self.last_health.is_none() && matches!(ms, Ms::Wait) && lp == Lp::Unknown && ls == Ls::Down
        {
            return Health::Uninitialized;
        }
        let settled = matches!(lp, Lp::Active | Lp::Standby) && !matches!(ms, Ms::Wait);
        if ls == Ls::Up && settled && ((lp == Lp::Active) == (ms == Ms::Active)) {
            Health::Healthy
        } else {
            Health::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_steady_issues_no_actions_besides_initial_health() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        let actions = c.evaluate(LinkProberLabel::Active, MuxStateLabel::Active, LinkStateLabel::Up);
        assert!(actions
            .iter()
            .any(|a| matches!(a, CompositeAction::SetLinkmgrHealth(super::super::Health::Healthy))));
        assert!(!actions.iter().any(|a| matches!(a, CompositeAction::SetMux(_))));
    }

    #[test]
    fn link_down_from_active_requests_standby() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        let actions = c.evaluate(LinkProberLabel::Active, MuxStateLabel::Active, LinkStateLabel::Down);
        assert!(actions
            .iter()
            .any(|a| matches!(a, CompositeAction::SetMux(MuxStateLabel::Standby))));
    }

    #[test]
    fn lp_unknown_ms_active_suspends_once() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        let a1 = c.evaluate(LinkProberLabel::Unknown, MuxStateLabel::Active, LinkStateLabel::Up);
        assert!(a1
            .iter()
            .any(|a| matches!(a, CompositeAction::SuspendLinkProberTx(5000))));
        let a2 = c.evaluate(LinkProberLabel::Unknown, MuxStateLabel::Active, LinkStateLabel::Up);
        assert!(!a2
            .iter()
            .any(|a| matches!(a, CompositeAction::SuspendLinkProberTx(_))));
    }

    #[test]
    fn manual_mode_issues_nothing() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        c.handle_event(CompositeEvent::MuxConfig(MuxConfigMode::Manual));
        let actions = c.evaluate(LinkProberLabel::Unknown, MuxStateLabel::Unknown, LinkStateLabel::Down);
        assert!(actions
            .iter()
            .all(|a| matches!(a, CompositeAction::SetLinkmgrHealth(_))));
    }

    #[test]
    fn forced_active_mode_never_sets_standby() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        c.handle_event(CompositeEvent::MuxConfig(MuxConfigMode::Active));
        let actions = c.evaluate(LinkProberLabel::Standby, MuxStateLabel::Standby, LinkStateLabel::Up);
        assert!(actions
            .iter()
            .any(|a| matches!(a, CompositeAction::SetMux(MuxStateLabel::Active))));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, CompositeAction::SetMux(MuxStateLabel::Standby))));
    }

    #[test]
    fn metrics_pairing_start_then_end() {
        let mut c = CompositeFsm::new(MuxConfigMode::Auto, 5000);
        let actions = c.evaluate(LinkProberLabel::Active, MuxStateLabel::Standby, LinkStateLabel::Down);
        // ls=Down branch with lp=Active takes precedence and issues a Set(Standby).
        assert!(actions
            .iter()
            .any(|a| matches!(a, CompositeAction::PostMetrics(MetricsKind::Start, MuxStateLabel::Standby))));
        let end = c.on_mux_committed(MuxStateLabel::Standby);
        assert_eq!(end, vec![CompositeAction::PostMetrics(MetricsKind::End, MuxStateLabel::Standby)]);
        // A second commit with nothing pending emits nothing (invariant 5).
        assert!(c.on_mux_committed(MuxStateLabel::Standby).is_empty());
    }
}
