//! The mention processing engine
//!
//! Everything between the HTTP surface and the database: fetching,
//! parsing, verification, submission, and the scheduling layer that
//! decides when each piece runs.

pub mod endpoint;
pub mod fetch;
pub mod incoming;
pub mod links;
pub mod microformats;
pub mod notes;
pub mod outgoing;
pub mod scheduler;

pub use fetch::Fetcher;
pub use incoming::{IncomingProcessor, ProcessOutcome};
pub use outgoing::OutgoingProcessor;
pub use scheduler::{DrainReport, Scheduler};
