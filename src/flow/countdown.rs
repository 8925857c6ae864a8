//! Advisory OTP countdown.
//!
//! Purely local display state. The backend is the authority on OTP expiry;
//! this only decides when the console stops accepting a code.

use std::time::Duration;

/// Outcome of one elapsed second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Still running with this many seconds left.
    Running(u32),
    /// Reached zero on this tick.
    Expired,
}

/// Seconds remaining in the current OTP window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
}

impl Countdown {
    /// Start a fresh countdown of `window` (rounded down to whole seconds).
    pub fn start(window: Duration) -> Self {
        let secs = u32::try_from(window.as_secs()).unwrap_or(u32::MAX);
        Self { remaining: secs }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Decrement by exactly one second.
    pub fn tick(&mut self) -> CountdownTick {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            CountdownTick::Expired
        } else {
            CountdownTick::Running(self.remaining)
        }
    }

    /// `m:ss` rendering for display.
    pub fn display(&self) -> String {
        format_remaining(self.remaining)
    }
}

/// Render seconds as `m:ss`.
pub fn format_remaining(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
