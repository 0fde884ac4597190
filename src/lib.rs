//! Gatekeeper - Adaptive Request Admission Control
//!
//! This crate decides whether an operation from a named caller may run now,
//! later, or not at all. Requests are checked against sliding window limits
//! per endpoint class, per identifier and per role. Repeat offenders are
//! slowed down by a progressive delay or banned outright, and denied requests
//! are re-submitted with bounded exponential backoff.

pub mod admission;
pub mod config;
pub mod error;

pub use admission::AdmissionGate;
pub use config::GatekeeperConfig;
pub use error::{GatekeeperError, Result};
