//! The three sub-state-machines and the composite fusion table.
//!
//! Each sub-FSM is a small total function `(label, event) -> label`, following
//! the spec's tagged-variant-dispatch redesign of the original class hierarchy.

mod composite;
mod link_prober_fsm;
mod link_state_fsm;
mod mux_state_fsm;

pub use composite::{CompositeAction, CompositeEvent, CompositeFsm, MetricsKind, MuxConfigMode};
pub use link_prober_fsm::{LinkProberEvent, LinkProberFsm, LinkProberLabel, LinkProberThresholds};
pub use link_state_fsm::{LinkStateEvent, LinkStateFsm, LinkStateLabel};
pub use mux_state_fsm::{MuxStateEvent, MuxStateFsm, MuxStateLabel};

/// Operator-visible summary of whether the composite state is consistent and link is up.
/// The actual (LP, MS, LS) fusion that derives this lives in `CompositeFsm::derive_health`,
/// the single source of truth for the health decision (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Health {
    Uninitialized,
    Unhealthy,
    Healthy,
}
