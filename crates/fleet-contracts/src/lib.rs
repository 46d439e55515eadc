//! # fleet-contracts
//!
//! Shared types, wire formats, and path conventions for the fleet
//! orchestrator.
//!
//! Every crate in the workspace imports from here. No orchestration logic
//! lives in this crate, only data definitions, the session layout, runtime
//! configuration, and the error type.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod layout;
pub mod message;
pub mod spawn;
pub mod workflow;
