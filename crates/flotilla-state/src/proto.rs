//! Wire types exchanged with the cluster resource manager.
//!
//! These mirror the scheduler API messages (offers, task infos, calls,
//! status updates) as plain serde structs. Encoding them for transport is
//! the connector driver's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use flotilla_core::Parameter;

// ── Offers ─────────────────────────────────────────────────────────

/// A resource offer from one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub framework_id: String,
    pub agent_id: String,
    pub hostname: String,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub value: ResourceValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceValue {
    Scalar { value: f64 },
    Ranges { ranges: Vec<Range> },
}

/// Inclusive `[begin, end]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Resource {
    pub fn scalar(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value: ResourceValue::Scalar { value },
        }
    }

    pub fn ranges(name: &str, ranges: Vec<Range>) -> Self {
        Self {
            name: name.to_string(),
            value: ResourceValue::Ranges { ranges },
        }
    }

    /// A `ports` resource covering exactly `ports`, collapsed into ranges.
    pub fn ports(ports: &[u64]) -> Self {
        let mut sorted = ports.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<Range> = Vec::new();
        for port in sorted {
            match ranges.last_mut() {
                Some(last) if last.end + 1 == port => last.end = port,
                _ => ranges.push(Range {
                    begin: port,
                    end: port,
                }),
            }
        }
        Self::ranges("ports", ranges)
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            ResourceValue::Scalar { value } => Some(value),
            ResourceValue::Ranges { .. } => None,
        }
    }

    /// Expand a ranges resource into individual values.
    pub fn expand_ranges(&self) -> Vec<u64> {
        match &self.value {
            ResourceValue::Ranges { ranges } => {
                ranges.iter().flat_map(|r| r.begin..=r.end).collect()
            }
            ResourceValue::Scalar { .. } => Vec::new(),
        }
    }
}

// ── Task info ──────────────────────────────────────────────────────

/// Complete launch descriptor for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub task_id: String,
    pub agent_id: String,
    pub resources: Vec<Resource>,
    pub command: CommandInfo,
    pub container: ContainerInfo,
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub shell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub uris: Vec<CommandUri>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandUri {
    pub value: String,
    pub extract: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerType {
    #[default]
    Docker,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "type")]
    pub kind: ContainerType,
    pub docker: DockerInfo,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    /// Named networks to join, for user-defined network mode.
    #[serde(default)]
    pub network_infos: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DockerNetwork {
    #[default]
    Bridge,
    Host,
    User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerInfo {
    pub image: String,
    pub network: DockerNetwork,
    pub privileged: bool,
    pub force_pull_image: bool,
    #[serde(default)]
    pub port_mappings: Vec<DockerPortMapping>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerPortMapping {
    pub host_port: u64,
    pub container_port: u32,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeAccess {
    Ro,
    Rw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub container_path: String,
    pub host_path: String,
    pub mode: VolumeAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckInfo {
    pub delay_seconds: f64,
    pub interval_seconds: f64,
    pub timeout_seconds: f64,
    pub grace_period_seconds: f64,
    pub consecutive_failures: u32,
    #[serde(flatten)]
    pub check: HealthCheckKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum HealthCheckKind {
    Http { port: u64, path: String },
    Tcp { port: u64 },
    Command { value: String },
}

// ── Calls ──────────────────────────────────────────────────────────

/// An outbound scheduler call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub framework_id: String,
    #[serde(flatten)]
    pub kind: CallKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CallKind {
    /// Accept `offer_ids` and launch `task_infos` on them.
    Launch {
        offer_ids: Vec<String>,
        task_infos: Vec<TaskInfo>,
    },
    Kill {
        task_id: String,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kill_policy: Option<KillPolicyInfo>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillPolicyInfo {
    pub grace_period_nanos: i64,
}

// ── Status updates ─────────────────────────────────────────────────

/// Task state as reported by the cluster resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireTaskState {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_KILLING")]
    Killing,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_ERROR")]
    Error,
    #[serde(rename = "TASK_LOST")]
    Lost,
    #[serde(rename = "TASK_DROPPED")]
    Dropped,
    #[serde(rename = "TASK_UNREACHABLE")]
    Unreachable,
    #[serde(rename = "TASK_GONE")]
    Gone,
    #[serde(rename = "TASK_GONE_BY_OPERATOR")]
    GoneByOperator,
    #[serde(rename = "TASK_UNKNOWN")]
    Unknown,
}

/// A status update for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: WireTaskState,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub healthy: Option<bool>,
    /// Container IP reported by the executor.
    #[serde(default)]
    pub container_ip: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

impl TaskStatus {
    pub fn new(task_id: &str, state: WireTaskState) -> Self {
        Self {
            task_id: task_id.to_string(),
            state,
            agent_id: None,
            reason: None,
            message: None,
            source: None,
            healthy: None,
            container_ip: None,
            container_id: None,
            container_name: None,
        }
    }
}
