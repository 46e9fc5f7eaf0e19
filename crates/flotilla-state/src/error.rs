//! Error types for the Flotilla state crate.

use flotilla_core::VersionError;
use thiserror::Error;

/// Result type alias for app/slot mutations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised while mutating apps and slots.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    #[error("app {app_id}: cannot switch between fixed-ip and replicated networking")]
    NetworkModeChange { app_id: String },

    #[error("app {app_id}: no ip available for slot {index}")]
    NoIpForSlot { app_id: String, index: u32 },

    #[error("app {app_id}: slot {index} not found")]
    SlotNotFound { app_id: String, index: u32 },
}

/// Offers missing identity fields cannot be launched against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferError {
    #[error("offer has no id")]
    MissingOfferId,

    #[error("offer {offer_id} has no agent id")]
    MissingAgentId { offer_id: String },

    #[error("offer {offer_id}: invalid port range [{begin}, {end}]")]
    InvalidPortRange { offer_id: String, begin: u64, end: u64 },
}

/// Errors raised while turning a slot and an offer into a launch descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LaunchError {
    #[error("offer {offer_id}: insufficient {resource} (need {needed}, have {available})")]
    InsufficientResources {
        offer_id: String,
        resource: &'static str,
        needed: f64,
        available: f64,
    },

    #[error("offer {offer_id}: insufficient ports (need {needed}, have {available})")]
    InsufficientPorts {
        offer_id: String,
        needed: usize,
        available: usize,
    },

    #[error("slot {slot_id} runs a fixed-ip app but has no ip")]
    MissingSlotIp { slot_id: String },

    #[error("{expected} port mappings but {got} host ports assigned")]
    PortCountMismatch { expected: usize, got: usize },

    #[error("health check references unknown port {0:?}")]
    UnknownHealthPort(String),

    #[error("health check is missing {0}")]
    IncompleteHealthCheck(&'static str),
}

/// Errors raised when handing calls to the cluster resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("framework is not registered yet")]
    NotRegistered,

    #[error("task {task_id} has no agent id; it was never launched")]
    MissingAgent { task_id: String },

    #[error("connector channel closed")]
    Closed,
}
