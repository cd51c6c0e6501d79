//! help-relay orchestration layer.
//!
//! - [`PollCycle`] runs one tick: read the watermark, search every configured
//!   organization, merge and order the results, deliver them one by one, and
//!   commit the watermark of the last delivered issue.
//! - [`Scheduler`] waits for the output channel to report ready, then drives
//!   [`PollCycle`] at a fixed interval until shutdown is requested.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** This crate sequences calls between the domain types in
//! [`relay`] and the port traits the infrastructure crates implement. It holds
//! no HTTP or filesystem code of its own.

pub mod cycle;
pub mod scheduler;

#[cfg(test)]
mod test_utils;

pub use cycle::{
    CycleOutcome, CycleSettings, DeliveryHalt, HaltReason, OrganizationFailure, PollCycle,
    TickError,
};
pub use scheduler::{Scheduler, SchedulerSettings};
