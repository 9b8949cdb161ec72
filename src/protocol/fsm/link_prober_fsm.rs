//! LP-FSM (spec §4.4): 3-state machine over ICMP evidence.

/// Evidence classification produced by the link prober's receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkProberEvent {
    /// We heard our own echoes looped back: the peer ToR has quiesced.
    Self_,
    /// We heard the peer ToR's probes: the peer is active.
    Peer,
    /// Neither, or a classification failure (truncation, bad checksum, or silence).
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkProberLabel {
    Active,
    Standby,
    Unknown,
}

/// Thresholds tunable from `CONFIG_DB/MUX_LINKMGR`.
#[derive(Debug, Clone, Copy)]
pub struct LinkProberThresholds {
    pub pos_retry: u32,
    pub neg_retry: u32,
}

impl Default for LinkProberThresholds {
    fn default() -> Self {
        Self {
            pos_retry: 1,
            neg_retry: 3,
        }
    }
}

/// Each state tracks two contradicting-event counters; entering a state resets both.
#[derive(Debug, Clone)]
pub struct LinkProberFsm {
    label: LinkProberLabel,
    self_count: u32,
    peer_count: u32,
    unknown_count: u32,
    thresholds: LinkProberThresholds,
}

impl LinkProberFsm {
    pub fn new(thresholds: LinkProberThresholds) -> Self {
        Self {
            label: LinkProberLabel::Unknown,
            self_count: 0,
            peer_count: 0,
            unknown_count: 0,
            thresholds,
        }
    }

    pub fn label(&self) -> LinkProberLabel {
        self.label
    }

    pub fn set_thresholds(&mut self, thresholds: LinkProberThresholds) {
        self.thresholds = thresholds;
    }

    fn enter(&mut self, label: LinkProberLabel) {
        self.label = label;
        self.self_count = 0;
        self.peer_count = 0;
        self.unknown_count = 0;
    }

    /// Dispatch one event; returns the (possibly unchanged) resulting label.
    pub fn handle(&mut self, event: LinkProberEvent) -> LinkProberLabel {
        match (self.label, event) {
            (LinkProberLabel::Active, LinkProberEvent::Self_) => {
                self.self_count = 0;
                self.peer_count = 0;
                self.unknown_count = 0;
            }
            (LinkProberLabel::Active, LinkProberEvent::Peer) => {
                self.peer_count += 1;
                if self.peer_count >= self.thresholds.pos_retry {
                    self.enter(LinkProberLabel::Standby);
                }
            }
            (LinkProberLabel::Active, LinkProberEvent::Unknown) => {
                self.unknown_count += 1;
                if self.unknown_count >= self.thresholds.neg_retry {
                    self.enter(LinkProberLabel::Unknown);
                }
            }
            (LinkProberLabel::Standby, LinkProberEvent::Self_) => {
                self.self_count += 1;
                if self.self_count >= self.thresholds.pos_retry {
                    self.enter(LinkProberLabel::Active);
                }
            }
            (LinkProberLabel::Standby, LinkProberEvent::Peer) => {
                self.self_count = 0;
                self.peer_count = 0;
                self.unknown_count = 0;
            }
            (LinkProberLabel::Standby, LinkProberEvent::Unknown) => {
                self.unknown_count += 1;
                if self.unknown_count >= self.thresholds.neg_retry {
                    self.enter(LinkProberLabel::Unknown);
                }
            }
            (LinkProberLabel::Unknown, LinkProberEvent::Self_) => {
                self.self_count += 1;
                if self.self_count >= self.thresholds.pos_retry {
                    self.enter(LinkProberLabel::Active);
                }
            }
            (LinkProberLabel::Unknown, LinkProberEvent::Peer) => {
                self.peer_count += 1;
                if self.peer_count >= self.thresholds.pos_retry {
                    self.enter(LinkProberLabel::Standby);
                }
            }
            (LinkProberLabel::Unknown, LinkProberEvent::Unknown) => {}
        }
        self.label
    }
}
