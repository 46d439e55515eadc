//! # fleet-bus
//!
//! The file-encoded request/response channel between workers and the
//! orchestrator.
//!
//! - `executor`: `OperationExecutor` and the local implementation
//! - `bus`     : `MessageBus`, the orchestrator side
//! - `client`  : `BusClient`, the worker side

pub mod bus;
pub mod client;
pub mod executor;

pub use bus::MessageBus;
pub use client::{BusClient, PendingFollowUp};
pub use executor::{LocalExecutor, OperationExecutor, OperationFailure, OperationOutcome};

// ── Tests ─────────────────────────────────────────────────────────────────────
