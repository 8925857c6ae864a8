//! Visa Console: operator console for the visa-application backend.

pub mod accounts;
pub mod api;
pub mod config;
pub mod console;
pub mod error;
pub mod flow;
