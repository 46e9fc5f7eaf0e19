//! Target change events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// A task became reachable.
    Add,
    /// A task went away.
    Del,
    /// Only the target's weight changed.
    #[serde(alias = "update")]
    Change,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Change::Add => "add",
            Change::Del => "del",
            Change::Change => "change",
        })
    }
}

/// A task endpoint appearing, disappearing or being re-weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetChangeEvent {
    pub change: Change,
    pub app_id: String,
    pub task_id: String,
    pub task_ip: String,
    pub task_port: u32,
    pub port_name: String,
    pub version_id: String,
    pub app_version: String,
    #[serde(default)]
    pub weight: f64,
}

impl TargetChangeEvent {
    /// Events carry one endpoint per task; this is a shorthand for tests and
    /// for callers that only know the task identity.
    pub fn new(change: Change, app_id: &str, task_id: &str) -> Self {
        Self {
            change,
            app_id: app_id.to_string(),
            task_id: task_id.to_string(),
            task_ip: String::new(),
            task_port: 0,
            port_name: String::new(),
            version_id: String::new(),
            app_version: String::new(),
            weight: 0.0,
        }
    }
}
