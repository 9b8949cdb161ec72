//! MS-FSM (spec §4.5): 5-state machine over reports from the driver / "set" intents.

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MuxStateEvent {
    ActiveReport,
    StandbyReport,
    UnknownReport,
    ErrorReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MuxStateLabel {
    Active,
    Standby,
    Unknown,
    Error,
    /// In-flight state while a probe or set is outstanding.
    Wait,
}

impl MuxStateEvent {
    fn settled_label(self) -> MuxStateLabel {
        match self {
            MuxStateEvent::ActiveReport => MuxStateLabel::Active,
            MuxStateEvent::StandbyReport => MuxStateLabel::Standby,
            MuxStateEvent::UnknownReport => MuxStateLabel::Unknown,
            MuxStateEvent::ErrorReport => MuxStateLabel::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MuxStateFsm {
    label: MuxStateLabel,
    /// Label a Wait-state transition is waiting to confirm, plus how many
    /// consecutive matching reports have been seen so far.
    pending: Option<MuxStateLabel>,
    confirm_count: u32,
    retry_count: u32,
}

impl MuxStateFsm {
    pub fn new(retry_count: u32) -> Self {
        Self {
            label: MuxStateLabel::Wait,
            pending: None,
            confirm_count: 0,
            retry_count,
        }
    }

    pub fn label(&self) -> MuxStateLabel {
        self.label
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    /// Enter Wait, awaiting `retry_count` consecutive matching reports before
    /// committing. Called when the composite FSM issues a Set or Probe/Get.
    pub fn enter_wait(&mut self) {
        self.label = MuxStateLabel::Wait;
        self.pending = None;
        self.confirm_count = 0;
    }

    /// Dispatch a report; returns the (possibly unchanged) resulting label.
    pub fn handle(&mut self, event: MuxStateEvent) -> MuxStateLabel {
        let reported = event.settled_label();
        match self.label {
            MuxStateLabel::Wait => {
                if self.pending == Some(reported) {
                    self.confirm_count += 1;
                } else {
                    self.pending = Some(reported);
                    self.confirm_count = 1;
                }
                if self.confirm_count >= self.retry_count {
                    self.label = reported;
                    self.pending = None;
                    self.confirm_count = 0;
                }
            }
            _ => {
                self.label = reported;
            }
        }
        self.label
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.label, MuxStateLabel::Wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_confirms_after_retry_count_matching_reports() {
        let mut fsm = MuxStateFsm::new(3);
        fsm.enter_wait();
        assert_eq!(fsm.handle(MuxStateEvent::StandbyReport), MuxStateLabel::Wait);
        assert_eq!(fsm.handle(MuxStateEvent::StandbyReport), MuxStateLabel::Wait);
        assert_eq!(
            fsm.handle(MuxStateEvent::StandbyReport),
            MuxStateLabel::Standby
        );
    }

    #[test]
    fn wait_resets_confirmation_on_mismatched_report() {
        let mut fsm = MuxStateFsm::new(3);
        fsm.enter_wait();
        fsm.handle(MuxStateEvent::StandbyReport);
        fsm.handle(MuxStateEvent::StandbyReport);
        assert_eq!(fsm.handle(MuxStateEvent::ActiveReport), MuxStateLabel::Wait);
        assert_eq!(fsm.handle(MuxStateEvent::ActiveReport), MuxStateLabel::Wait);
        assert_eq!(
            fsm.handle(MuxStateEvent::ActiveReport),
            MuxStateLabel::Active
        );
    }

    #[test]
    fn settled_state_takes_report_immediately() {
        let mut fsm = MuxStateFsm::new(3);
        fsm.enter_wait();
        fsm.handle(MuxStateEvent::ActiveReport);
        fsm.handle(MuxStateEvent::ActiveReport);
        fsm.handle(MuxStateEvent::ActiveReport);
        assert_eq!(fsm.label(), MuxStateLabel::Active);
        assert_eq!(
            fsm.handle(MuxStateEvent::ErrorReport),
            MuxStateLabel::Error
        );
    }
}
