//! LS-FSM (spec §4.6): 2-state machine over NIC operational status.

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkStateEvent {
    UpEvent,
    DownEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkStateLabel {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct LinkStateFsm {
    label: LinkStateLabel,
    pending: Option<LinkStateLabel>,
    confirm_count: u32,
    retry_count: u32,
}

impl LinkStateFsm {
    pub fn new(retry_count: u32) -> Self {
        Self {
            label: LinkStateLabel::Down,
            pending: None,
            confirm_count: 0,
            retry_count: retry_count.max(1),
        }
    }

    pub fn label(&self) -> LinkStateLabel {
        self.label
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count.max(1);
    }

    pub fn handle(&mut self, event: LinkStateEvent) -> LinkStateLabel {
        let reported = match event {
            LinkStateEvent::UpEvent => LinkStateLabel::Up,
            LinkStateEvent::DownEvent => LinkStateLabel::Down,
        };
        if reported == self.label {
            self.pending = None;
            self.confirm_count = 0;
            return self.label;
        }
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
        self.label
    }
}
