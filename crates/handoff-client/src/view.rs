use crate::session::{HandoffSnapshot, HandoffState};

pub const USED_MESSAGE: &str = "QR code for this page has already been used";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Info,
    Error,
}

/// The single status notice a session shows. Setting a new one replaces the
/// old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Label and enablement of the "continue on mobile" control. Blocked states
/// stay visible with the reason as the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlView {
    pub label: &'static str,
    pub disabled: bool,
}

impl ControlView {
    pub fn for_snapshot(snapshot: &HandoffSnapshot) -> Self {
        let (label, disabled) = match &snapshot.state {
            HandoffState::Generating => ("Generating...", true),
            HandoffState::Active(_) => ("Hide QR Code", false),
            HandoffState::Used(_) => ("Already Scanned", true),
            HandoffState::Expired(_) => ("QR Expired", !snapshot.can_generate),
            HandoffState::Idle | HandoffState::Dismissed(_) if !snapshot.can_generate => {
                ("Already Scanned", true)
            }
            HandoffState::Idle | HandoffState::Dismissed(_) => ("Continue On Mobile", false),
        };
        Self { label, disabled }
    }
}
