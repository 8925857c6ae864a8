//! Application flow: the visa-application/OTP wizard.
//!
//! An applicant's email is exchanged for a session token, an OTP is sent and
//! verified within a two-minute window, and the verified application is
//! submitted for a reservation and payment session.

pub mod controller;
pub mod countdown;
pub mod events;
pub mod stage;

pub use controller::{FlowController, FlowSnapshot, PostVerification};
pub use countdown::{Countdown, CountdownTick, format_remaining};
pub use events::{FlowEvent, Notice, NoticeLevel};
pub use stage::{FlowStage, StageKind, SubmissionReceipt, TokenSession};
