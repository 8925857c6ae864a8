//! Notices and events the controller publishes to the console.

use serde::Serialize;

use super::stage::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Broadcast to every subscriber as the flow moves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    StageChanged { from: StageKind, to: StageKind },
    Countdown { remaining_secs: u32 },
    OtpExpired,
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(FlowEvent::StageChanged {
            from: StageKind::AwaitingEmail,
            to: StageKind::AwaitingOtpRequest,
        })
        .unwrap();
        assert_eq!(json["type"], "stage_changed");
        assert_eq!(json["to"], "awaiting_otp_request");

        let json = serde_json::to_value(FlowEvent::Notice(Notice::error("boom"))).unwrap();
        assert_eq!(json["type"], "notice");
        assert_eq!(json["level"], "error");
        assert_eq!(json["text"], "boom");
    }
}
