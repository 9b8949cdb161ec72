//! Config loader (C12): tunables republished wholesale on every
//! `CONFIG_DB/MUX_LINKMGR` notification, matching the teacher's
//! `StateManager::write_status` discipline of replacing a whole value under
//! one lock acquisition rather than mutating fields in place.

use std::sync::Arc;

use parking_lot::RwLock;

use super::fsm::LinkProberThresholds;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    pub interval_v4_ms: u64,
    pub interval_v6_ms: u64,
    pub positive_signal_count: u32,
    pub negative_signal_count: u32,
    pub suspend_timer_ms: u64,
    pub mux_state_change_retry_count: u32,
    pub link_state_change_retry_count: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            interval_v4_ms: 100,
            interval_v6_ms: 100,
            positive_signal_count: 1,
            negative_signal_count: 3,
            suspend_timer_ms: 3_000,
            mux_state_change_retry_count: 3,
            link_state_change_retry_count: 1,
        }
    }
}

impl Tunables {
    pub fn link_prober_thresholds(&self) -> LinkProberThresholds {
        LinkProberThresholds {
            pos_retry: self.positive_signal_count,
            neg_retry: self.negative_signal_count,
        }
    }
}

/// A read-mostly snapshot handle. `replace` swaps the whole value at once so
/// readers never observe a torn mix of old and new fields.
#[derive(Clone)]
pub struct TunablesHandle(Arc<RwLock<Tunables>>);

impl TunablesHandle {
    pub fn new(initial: Tunables) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn snapshot(&self) -> Tunables {
        *self.0.read()
    }

    pub fn replace(&self, new: Tunables) {
        *self.0.write() = new;
    }
}

impl Default for TunablesHandle {
    fn default() -> Self {
        Self::new(Tunables::default())
    }
}
