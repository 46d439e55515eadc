//! # fleet-monitor
//!
//! Turns filesystem activity under `<session>/workers/` into typed
//! `FileEvent`s.
//!
//! - `classify`: the rule table mapping a path to `(task_id, EventKind)`
//! - `watcher` : `FileMonitor`, a notify watcher feeding a bounded queue

pub mod classify;
pub mod watcher;

pub use classify::classify;
pub use watcher::{FileMonitor, MonitorChannels};

// ── Tests ─────────────────────────────────────────────────────────────────────
