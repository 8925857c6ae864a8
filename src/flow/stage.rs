//! Application flow stages.
//!
//! Progresses linearly: AwaitingEmail → AwaitingOtpRequest → AwaitingOtpEntry →
//! Verified → Submitted, with one back-edge from AwaitingOtpEntry to
//! AwaitingOtpRequest when the OTP window lapses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::countdown::Countdown;
use crate::api::ApplicationData;

/// Stage names without their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    AwaitingEmail,
    AwaitingOtpRequest,
    AwaitingOtpEntry,
    Verified,
    Submitted,
}

impl StageKind {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// A full reset back to `AwaitingEmail` is always allowed and is not
    /// modelled here.
    pub fn can_transition_to(&self, target: StageKind) -> bool {
        use StageKind::*;
        matches!(
            (self, target),
            (AwaitingEmail, AwaitingOtpRequest)
                | (AwaitingOtpRequest, AwaitingOtpEntry)
                | (AwaitingOtpEntry, AwaitingOtpRequest)
                | (AwaitingOtpEntry, Verified)
                // late verification for a window that already lapsed
                | (AwaitingOtpRequest, Verified)
                | (Verified, Submitted)
        )
    }

    /// Whether this stage is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted)
    }
}

impl Default for StageKind {
    fn default() -> Self {
        Self::AwaitingEmail
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingEmail => "awaiting_email",
            Self::AwaitingOtpRequest => "awaiting_otp_request",
            Self::AwaitingOtpEntry => "awaiting_otp_entry",
            Self::Verified => "verified",
            Self::Submitted => "submitted",
        };
        write!(f, "{s}")
    }
}

/// Everything the backend handed back for one email submission.
#[derive(Debug, Clone)]
pub struct TokenSession {
    pub email: String,
    /// Bearer credential for every later step. Shared, never cloned out.
    pub token: Arc<SecretString>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub application: Option<ApplicationData>,
}

/// Terminal output of a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub session_id: String,
    pub reservation_link: String,
    /// Hosted checkout link derived from `session_id`.
    pub payment_url: String,
}

/// Current stage together with the data that is legal in it.
#[derive(Debug, Clone)]
pub enum FlowStage {
    AwaitingEmail,
    AwaitingOtpRequest {
        session: TokenSession,
        /// Set when the previous OTP window lapsed unverified.
        expired_window: Option<u64>,
    },
    AwaitingOtpEntry {
        session: TokenSession,
        window: u64,
        countdown: Countdown,
    },
    Verified {
        session: TokenSession,
    },
    Submitted {
        email: String,
        receipt: SubmissionReceipt,
    },
}

impl FlowStage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::AwaitingEmail => StageKind::AwaitingEmail,
            Self::AwaitingOtpRequest { .. } => StageKind::AwaitingOtpRequest,
            Self::AwaitingOtpEntry { .. } => StageKind::AwaitingOtpEntry,
            Self::Verified { .. } => StageKind::Verified,
            Self::Submitted { .. } => StageKind::Submitted,
        }
    }

    /// Session data, for every stage that holds one.
    pub fn session(&self) -> Option<&TokenSession> {
        match self {
            Self::AwaitingOtpRequest { session, .. }
            | Self::AwaitingOtpEntry { session, .. }
            | Self::Verified { session } => Some(session),
            Self::AwaitingEmail | Self::Submitted { .. } => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Submitted { email, .. } => Some(email),
            other => other.session().map(|s| s.email.as_str()),
        }
    }

    pub fn countdown(&self) -> Option<&Countdown> {
        match self {
            Self::AwaitingOtpEntry { countdown, .. } => Some(countdown),
            _ => None,
        }
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        match self {
            Self::Submitted { receipt, .. } => Some(receipt),
            _ => None,
        }
    }
}

impl Default for FlowStage {
    fn default() -> Self {
        Self::AwaitingEmail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> TokenSession {
        TokenSession {
            email: "a@b.com".into(),
            token: Arc::new(SecretString::from("t1".to_string())),
            token_expires_at: None,
            application: None,
        }
    }

    #[test]
    fn valid_transitions() {
        use StageKind::*;
        let transitions = [
            (AwaitingEmail, AwaitingOtpRequest),
            (AwaitingOtpRequest, AwaitingOtpEntry),
            (AwaitingOtpEntry, AwaitingOtpRequest),
            (AwaitingOtpEntry, Verified),
            (AwaitingOtpRequest, Verified),
            (Verified, Submitted),
        ];
        for (from, to) in transitions {
            assert!(
                from.can_transition_to(to),
                "{from} should transition to {to}"
            );
        }
    }

    #[test]
    fn invalid_transitions() {
        use StageKind::*;
        // Skip stages
        assert!(!AwaitingEmail.can_transition_to(AwaitingOtpEntry));
        assert!(!AwaitingEmail.can_transition_to(Verified));
        assert!(!AwaitingOtpRequest.can_transition_to(Submitted));
        // Go backward
        assert!(!Verified.can_transition_to(AwaitingOtpEntry));
        assert!(!Verified.can_transition_to(AwaitingOtpRequest));
        // Terminal
        assert!(!Submitted.can_transition_to(Verified));
        // Self-transition
        assert!(!Verified.can_transition_to(Verified));
    }

    #[test]
    fn only_submitted_is_terminal() {
        use StageKind::*;
        assert!(Submitted.is_terminal());
        for kind in [AwaitingEmail, AwaitingOtpRequest, AwaitingOtpEntry, Verified] {
            assert!(!kind.is_terminal());
        }
    }

    #[test]
    fn display_matches_serde() {
        use StageKind::*;
        for kind in [
            AwaitingEmail,
            AwaitingOtpRequest,
            AwaitingOtpEntry,
            Verified,
            Submitted,
        ] {
            let display = format!("{kind}");
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(format!("\"{display}\""), json);
        }
    }

    #[test]
    fn stage_exposes_only_its_own_data() {
        let entry = FlowStage::AwaitingOtpEntry {
            session: session(),
            window: 1,
            countdown: Countdown::start(Duration::from_secs(120)),
        };
        assert_eq!(entry.kind(), StageKind::AwaitingOtpEntry);
        assert_eq!(entry.email(), Some("a@b.com"));
        assert_eq!(entry.countdown().map(|c| c.remaining()), Some(120));
        assert!(entry.receipt().is_none());

        let verified = FlowStage::Verified { session: session() };
        assert!(verified.countdown().is_none());

        let done = FlowStage::Submitted {
            email: "a@b.com".into(),
            receipt: SubmissionReceipt {
                session_id: "S1".into(),
                reservation_link: "https://r.example/1".into(),
                payment_url: "https://pay.example/S1".into(),
            },
        };
        assert!(done.session().is_none());
        assert_eq!(done.email(), Some("a@b.com"));
        assert_eq!(done.receipt().unwrap().session_id, "S1");

        assert_eq!(FlowStage::default().kind(), StageKind::AwaitingEmail);
        assert!(FlowStage::default().email().is_none());
    }
}
