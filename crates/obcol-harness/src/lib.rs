#![forbid(unsafe_code)]

//! Test harness for observable collections.
//!
//! Provides recording observers with JSONL export, a transcript printer
//! matching the classic `update: <payload>` regression output, and the
//! regression scenarios themselves.

/// Notification recording and JSONL logs.
pub mod recorder;
/// Reproducible regression scenarios.
pub mod scenario;

pub use recorder::{Notification, Printer, Recorder, Transcript, observed};
pub use scenario::Scenario;
