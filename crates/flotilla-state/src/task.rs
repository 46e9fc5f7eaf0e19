//! Tasks and their lifecycle. A task is one execution attempt of a slot.
//!
//! The lifecycle split:
//! - [`Task::new`] creates an attempt with a fresh id.
//! - [`Task::prepare`] turns slot + offer into a launch descriptor.
//! - [`Task::kill`] hands a kill call to the connector and returns.
//! - [`Task::apply_status`] records state reported by the cluster.

use std::sync::Arc;

use flotilla_core::{Parameter, Version};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::{App, Slot};
use crate::builder::{DefaultLabels, TaskBuilder};
use crate::connector::Connector;
use crate::error::{ConnectorError, LaunchError};
use crate::now_millis;
use crate::offer::OfferWrapper;
use crate::proto::{Call, CallKind, KillPolicyInfo, TaskInfo, TaskStatus, WireTaskState};

/// Recorded lifecycle state of a task.
///
/// ```text
/// Created → Staged → Running → Killing → Killed
///                            ↘ Finished | Failed | Lost
/// ```
///
/// Any non-terminal state may jump straight to a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Staged,
    Running,
    Killing,
    Killed,
    Finished,
    Failed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Killed | TaskState::Finished | TaskState::Failed | TaskState::Lost
        )
    }

    /// Whether a recorded `self` may move to `next`. Repeats are allowed.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        matches!(
            (self, next),
            (Created, Staged | Running | Killing) | (Staged, Running | Killing) | (Running, Killing)
        )
    }
}

impl From<WireTaskState> for TaskState {
    fn from(state: WireTaskState) -> Self {
        match state {
            WireTaskState::Staging | WireTaskState::Starting => TaskState::Staged,
            WireTaskState::Running => TaskState::Running,
            WireTaskState::Killing => TaskState::Killing,
            WireTaskState::Killed => TaskState::Killed,
            WireTaskState::Finished => TaskState::Finished,
            WireTaskState::Failed | WireTaskState::Error | WireTaskState::Dropped => {
                TaskState::Failed
            }
            WireTaskState::Lost
            | WireTaskState::Unreachable
            | WireTaskState::Gone
            | WireTaskState::GoneByOperator
            | WireTaskState::Unknown => TaskState::Lost,
        }
    }
}

/// One execution attempt of a slot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// `{slot_id}-{uuid}`; unique across attempts of the same slot.
    pub id: String,
    #[serde(skip)]
    pub version: Arc<Version>,
    pub version_id: String,
    pub slot_id: String,
    pub state: TaskState,

    pub stdout: String,
    pub stderr: String,

    pub host_ports: Vec<u64>,
    pub offer_id: Option<String>,
    pub agent_id: Option<String>,
    pub ip: Option<String>,
    pub agent_hostname: Option<String>,
    pub healthy: Option<bool>,

    /// Termination details as reported by the cluster.
    pub reason: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,

    pub container_id: Option<String>,
    pub container_name: Option<String>,

    /// Unix millis.
    pub created_at: u64,
    pub archived_at: Option<u64>,
}

impl Task {
    pub fn new(version: Arc<Version>, slot: &Slot) -> Self {
        let id = format!("{}-{}", slot.id, Uuid::new_v4().simple());
        debug!(task = %id, slot = %slot.id, "task created");
        Self {
            id,
            version_id: version.id.clone(),
            version,
            slot_id: slot.id.clone(),
            state: TaskState::Created,
            stdout: String::new(),
            stderr: String::new(),
            host_ports: Vec::new(),
            offer_id: None,
            agent_id: None,
            ip: slot.ip.clone(),
            agent_hostname: None,
            healthy: None,
            reason: None,
            message: None,
            source: None,
            container_id: None,
            container_name: None,
            created_at: now_millis(),
            archived_at: None,
        }
    }

    /// Build the launch descriptor for this task against `offer`.
    ///
    /// Resources and host ports are taken from `offer` only when the whole
    /// descriptor builds; on error the offer is left as it was.
    pub fn prepare(
        &mut self,
        app: &App,
        slot: &Slot,
        offer: &mut OfferWrapper,
    ) -> Result<TaskInfo, LaunchError> {
        let version = &slot.version;
        let container = &version.container;
        let default_labels = DefaultLabels::new(app, slot, &self.id);

        let mut scratch = offer.clone();
        let allocation = scratch.allocate(&version.resources, container.port_mappings.len())?;

        let mut builder = TaskBuilder::new(&slot.id, &self.id, scratch.agent_id())
            .resources(&allocation)
            .command(version.command.as_deref(), &version.args)
            .docker(container)
            .environment(&version.env)
            .uris(&version.uris)
            .labels(version.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .labels(default_labels.iter())
            .parameters(container.parameters.iter().cloned());

        if app.is_fixed() {
            let ip = slot.ip.as_deref().ok_or_else(|| LaunchError::MissingSlotIp {
                slot_id: slot.id.clone(),
            })?;
            builder = builder.parameters([Parameter::new("ip", ip)]);
        }

        builder = builder
            .parameters(default_labels.to_parameters())
            .network(&container.network, &container.port_mappings, &allocation.ports)?;

        if let Some(hc) = &version.health_check {
            builder = builder.health_check(hc)?;
        }

        let (info, host_ports) = builder.build();
        self.host_ports = host_ports;
        self.offer_id = Some(scratch.id().to_string());
        self.agent_id = Some(scratch.agent_id().to_string());
        self.agent_hostname = Some(scratch.hostname().to_string());
        *offer = scratch;

        info!(
            task = %self.id,
            slot = %slot.id,
            offer = %offer.id(),
            host_ports = ?self.host_ports,
            "prepared task for launch"
        );
        Ok(info)
    }

    /// The kill call for this task, with a grace period when the version's
    /// kill policy sets a non-zero duration.
    pub fn kill_call(&self, framework_id: &str) -> Result<Call, ConnectorError> {
        let agent_id = self
            .agent_id
            .clone()
            .ok_or_else(|| ConnectorError::MissingAgent {
                task_id: self.id.clone(),
            })?;
        let kill_policy = self
            .version
            .kill_policy
            .and_then(|p| p.grace_period_nanos())
            .map(|grace_period_nanos| KillPolicyInfo { grace_period_nanos });

        Ok(Call {
            framework_id: framework_id.to_string(),
            kind: CallKind::Kill {
                task_id: self.id.clone(),
                agent_id,
                kill_policy,
            },
        })
    }

    /// Send a kill call and mark the task `Killing`. Does not wait for the
    /// cluster to confirm; the terminal state arrives as a status update.
    pub fn kill(&mut self, connector: &dyn Connector) -> Result<(), ConnectorError> {
        let framework_id = connector
            .framework_id()
            .ok_or(ConnectorError::NotRegistered)?;
        let call = self.kill_call(&framework_id)?;

        info!(task = %self.id, slot = %self.slot_id, "killing task");
        connector.send_call(call)?;
        self.mark_killing();
        Ok(())
    }

    /// Record that a kill call for this task has been handed off.
    /// Terminal tasks keep their state.
    pub fn mark_killing(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Killing;
        }
    }

    /// Record a status update. Returns the `(from, to)` transition, or
    /// `None` when the update is out of order and was ignored.
    pub fn apply_status(&mut self, status: &TaskStatus) -> Option<(TaskState, TaskState)> {
        let next = TaskState::from(status.state);
        let prev = self.state;
        if !prev.can_transition_to(next) {
            warn!(
                task = %self.id,
                from = ?prev,
                to = ?next,
                "ignoring out-of-order status update"
            );
            return None;
        }

        self.state = next;
        if status.reason.is_some() {
            self.reason = status.reason.clone();
        }
        if status.message.is_some() {
            self.message = status.message.clone();
        }
        if status.source.is_some() {
            self.source = status.source.clone();
        }
        if status.healthy.is_some() {
            self.healthy = status.healthy;
        }
        if let Some(ip) = &status.container_ip {
            self.ip = Some(ip.clone());
        }
        if status.container_id.is_some() {
            self.container_id = status.container_id.clone();
        }
        if status.container_name.is_some() {
            self.container_name = status.container_name.clone();
        }
        if self.agent_id.is_none() {
            self.agent_id = status.agent_id.clone();
        }

        debug!(task = %self.id, from = ?prev, to = ?next, "task state updated");
        Some((prev, next))
    }

    /// Mark a terminal task as archived. Returns false for live tasks.
    pub fn archive_at(&mut self, now: u64) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        if self.archived_at.is_none() {
            self.archived_at = Some(now);
        }
        true
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
