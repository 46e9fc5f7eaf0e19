//! Scheduler state for Flotilla: apps and their slots, task attempts,
//! offer bookkeeping, launch descriptor construction and the app registry.

pub mod app;
pub mod builder;
pub mod connector;
pub mod error;
pub mod offer;
pub mod proto;
pub mod store;
pub mod task;

use std::time::{SystemTime, UNIX_EPOCH};

pub use app::{App, AppMode, Slot, slot_id};
pub use builder::{DefaultLabels, TaskBuilder};
pub use connector::{ChannelConnector, Connector};
pub use error::{ConnectorError, LaunchError, OfferError, StateError, StateResult};
pub use offer::{Allocation, OfferWrapper};
pub use store::{AppFilterOptions, AppStore};
pub use task::{Task, TaskState};

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
