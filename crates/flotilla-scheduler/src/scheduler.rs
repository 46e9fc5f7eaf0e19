//! Scheduler: maps app slots onto offers and tracks what the cluster
//! reports back.
//!
//! The `Scheduler`:
//! - Registers apps, scales and redeploys them
//! - Launches slots against offers and kills their tasks
//! - Folds task status updates into the registry
//! - Emits target change events as tasks start and stop serving
//!
//! Calls to the connector are never made while the registry lock is held:
//! they are built from a snapshot, sent, and only then recorded.

use std::collections::HashSet;
use std::sync::Arc;

use flotilla_core::{NetworkMode, Version};
use flotilla_proxy::{Change, TargetChangeEvent};
use flotilla_state::proto::{Call, CallKind, TaskInfo, TaskStatus};
use flotilla_state::{
    App, AppStore, Connector, ConnectorError, OfferWrapper, StateError, Task, TaskState,
    now_millis,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Weight given to a target when it starts serving.
pub const DEFAULT_WEIGHT: f64 = 100.0;

/// Drives apps in the registry against offers from the cluster.
///
/// Calls are handed to the [`Connector`] without waiting for an answer;
/// their outcome arrives later through [`Scheduler::handle_status`].
pub struct Scheduler {
    store: AppStore,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<TargetChangeEvent>,
    cluster_id: String,
}

impl Scheduler {
    /// Create a scheduler over `store`. Target change events go to
    /// `events`; a dropped receiver only silences them.
    pub fn new(
        store: AppStore,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<TargetChangeEvent>,
        cluster_id: &str,
    ) -> Self {
        Self {
            store,
            connector,
            events,
            cluster_id: cluster_id.to_string(),
        }
    }

    /// The registry this scheduler mutates.
    pub fn store(&self) -> &AppStore {
        &self.store
    }

    /// Create an app from its first version and add it to the registry.
    pub fn register(&self, app_id: &str, version: Version) -> SchedulerResult<Arc<App>> {
        if self.store.get(app_id).is_some() {
            return Err(SchedulerError::AppExists(app_id.to_string()));
        }
        let app = App::new(app_id, &self.cluster_id, version)?;
        Ok(self.store.add(app))
    }

    /// Launch one slot against `offer`.
    pub fn launch(
        &self,
        app_id: &str,
        slot_index: u32,
        offer: &mut OfferWrapper,
    ) -> SchedulerResult<TaskInfo> {
        let mut infos = self.launch_all(app_id, offer, &[slot_index])?;
        infos
            .pop()
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))
    }

    /// Launch several slots of one app against the same offer in a single
    /// call. Either every slot launches or none does: the offer and the
    /// registry are only updated once the call has been handed off.
    ///
    /// A slot whose current task is still live is busy and fails the whole
    /// launch, as does naming a slot twice. Kill the live task first.
    pub fn launch_all(
        &self,
        app_id: &str,
        offer: &mut OfferWrapper,
        slot_indices: &[u32],
    ) -> SchedulerResult<Vec<TaskInfo>> {
        let app = self.app(app_id)?;
        let framework_id = self.framework_id()?;

        let mut scratch = offer.clone();
        let mut tasks: Vec<(u32, Task)> = Vec::with_capacity(slot_indices.len());
        let mut infos = Vec::with_capacity(slot_indices.len());
        for &index in slot_indices {
            let slot = app.slot(index).ok_or_else(|| StateError::SlotNotFound {
                app_id: app_id.to_string(),
                index,
            })?;
            if let Some((_, pending)) = tasks.iter().find(|(i, _)| *i == index) {
                return Err(busy(&slot.id, pending));
            }
            if let Some(live) = slot.current_task.as_ref().filter(|t| !t.state.is_terminal()) {
                return Err(busy(&slot.id, live));
            }
            let mut task = Task::new(slot.version.clone(), slot);
            infos.push(task.prepare(&app, slot, &mut scratch)?);
            tasks.push((index, task));
        }

        self.connector.send_call(Call {
            framework_id,
            kind: CallKind::Launch {
                offer_ids: vec![scratch.id().to_string()],
                task_infos: infos.clone(),
            },
        })?;

        self.store
            .update(app_id, |app| -> SchedulerResult<()> {
                for (index, task) in tasks {
                    app.slot_mut(index)?.set_current_task(task);
                }
                Ok(())
            })
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))??;

        info!(
            app = %app_id,
            offer = %scratch.id(),
            tasks = infos.len(),
            ports_left = scratch.ports_remain().len(),
            "launched tasks"
        );
        *offer = scratch;
        Ok(infos)
    }

    /// Kill the current task of a slot. Returns once the call is handed off.
    pub fn kill(&self, app_id: &str, slot_index: u32) -> SchedulerResult<()> {
        let app = self.app(app_id)?;
        let slot = app.slot(slot_index).ok_or_else(|| StateError::SlotNotFound {
            app_id: app_id.to_string(),
            index: slot_index,
        })?;
        let task = slot
            .current_task
            .as_ref()
            .ok_or_else(|| SchedulerError::NoCurrentTask(slot.id.clone()))?;
        let call = task.kill_call(&self.framework_id()?)?;

        info!(app = %app_id, task = %task.id, slot = %slot.id, "killing task");
        self.connector.send_call(call)?;

        let sent = HashSet::from([task.id.clone()]);
        let events = self
            .store
            .update(app_id, |app| -> SchedulerResult<Vec<TargetChangeEvent>> {
                let app_version = app.current_version.id.clone();
                let slot = app.slot_mut(slot_index)?;
                let tasks = slot.current_task.iter_mut().chain(slot.history.iter_mut());
                Ok(mark_killing(tasks, &sent, app_id, &app_version))
            })
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))??;

        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    /// Record a status update from the cluster. Updates for tasks that
    /// are not in the registry are logged and dropped.
    pub fn handle_status(&self, status: &TaskStatus) -> Option<(TaskState, TaskState)> {
        let Some((app_id, slot_index)) = locate(&status.task_id) else {
            warn!(task = %status.task_id, "status update for malformed task id dropped");
            return None;
        };

        let outcome = self.store.update(app_id, |app| -> Result<_, ()> {
            let app_version = app.current_version.id.clone();
            let slot = app.slot_mut(slot_index).map_err(|_| ())?;
            let task = slot.task_mut(&status.task_id).ok_or(())?;
            let Some((from, to)) = task.apply_status(status) else {
                return Ok(None);
            };

            let change = match (from, to) {
                (from, TaskState::Running) if from != TaskState::Running => Some(Change::Add),
                (TaskState::Running, to) if to.is_terminal() || to == TaskState::Killing => {
                    Some(Change::Del)
                }
                _ => None,
            };
            let event = change.and_then(|c| target_event(c, app_id, &app_version, task));
            if to.is_terminal() {
                task.archive_at(now_millis());
            }
            Ok(Some((from, to, event)))
        });

        match outcome {
            None | Some(Err(())) => {
                warn!(task = %status.task_id, state = ?status.state, "status update for unknown task dropped");
                None
            }
            Some(Ok(None)) => None,
            Some(Ok(Some((from, to, event)))) => {
                info!(task = %status.task_id, from = ?from, to = ?to, "task status applied");
                if let Some(event) = event {
                    self.emit(event);
                }
                Some((from, to))
            }
        }
    }

    /// Grow or shrink an app. Returns the ids of removed slots.
    ///
    /// Live tasks of the slots being removed are killed before the slots
    /// leave the registry. If a kill cannot be handed off the app keeps
    /// all of its slots, tasks whose kill did go out are marked `Killing`,
    /// and the error is returned.
    pub fn scale(&self, app_id: &str, target: u32) -> SchedulerResult<Vec<String>> {
        let app = self.app(app_id)?;
        let live: Vec<&Task> = app
            .slots
            .iter()
            .skip(target as usize)
            .filter_map(|s| s.current_task.as_ref())
            .filter(|t| !t.state.is_terminal())
            .collect();
        let calls = if live.is_empty() {
            Vec::new()
        } else {
            let framework_id = self.framework_id()?;
            live.iter()
                .map(|t| -> SchedulerResult<(String, Call)> {
                    Ok((t.id.clone(), t.kill_call(&framework_id)?))
                })
                .collect::<SchedulerResult<Vec<_>>>()?
        };

        let mut sent = HashSet::with_capacity(calls.len());
        let mut failure = None;
        for (task_id, call) in calls {
            info!(app = %app_id, task = %task_id, "killing task of removed slot");
            if let Err(e) = self.connector.send_call(call) {
                warn!(app = %app_id, task = %task_id, error = %e, "kill not handed off; keeping slots");
                failure = Some(e);
                break;
            }
            sent.insert(task_id);
        }

        let (removed_ids, events) = self
            .store
            .update(app_id, |app| -> SchedulerResult<(Vec<String>, Vec<TargetChangeEvent>)> {
                let app_version = app.current_version.id.clone();
                if failure.is_some() {
                    let tasks = app.slots.iter_mut().filter_map(|s| s.current_task.as_mut());
                    return Ok((Vec::new(), mark_killing(tasks, &sent, app_id, &app_version)));
                }
                let mut removed = app.scale(target)?;
                let tasks = removed.iter_mut().filter_map(|s| s.current_task.as_mut());
                let events = mark_killing(tasks, &sent, app_id, &app_version);
                Ok((removed.into_iter().map(|s| s.id).collect(), events))
            })
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))??;

        for event in events {
            self.emit(event);
        }
        if let Some(e) = failure {
            return Err(e.into());
        }
        info!(app = %app_id, target, removed = removed_ids.len(), "app scaled");
        Ok(removed_ids)
    }

    /// Point an app at a new version. Slots and their tasks are untouched;
    /// they pick up the version when relaunched.
    pub fn redeploy(&self, app_id: &str, version: Version) -> SchedulerResult<Arc<Version>> {
        let version = self
            .store
            .update(app_id, |app| app.redeploy(version))
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))??;
        Ok(version)
    }

    fn app(&self, app_id: &str) -> SchedulerResult<Arc<App>> {
        self.store
            .get(app_id)
            .ok_or_else(|| SchedulerError::AppNotFound(app_id.to_string()))
    }

    fn framework_id(&self) -> SchedulerResult<String> {
        Ok(self
            .connector
            .framework_id()
            .ok_or(ConnectorError::NotRegistered)?)
    }

    fn emit(&self, event: TargetChangeEvent) {
        debug!(app = %event.app_id, task = %event.task_id, change = %event.change, "target change");
        if self.events.send(event).is_err() {
            debug!("no upstream loader listening for target events");
        }
    }
}

fn busy(slot_id: &str, task: &Task) -> SchedulerError {
    SchedulerError::SlotBusy {
        slot_id: slot_id.to_string(),
        task_id: task.id.clone(),
    }
}

/// Mark the tasks in `sent` as `Killing` and return removal events for
/// the ones that were serving.
fn mark_killing<'a>(
    tasks: impl IntoIterator<Item = &'a mut Task>,
    sent: &HashSet<String>,
    app_id: &str,
    app_version: &str,
) -> Vec<TargetChangeEvent> {
    let mut events = Vec::new();
    for task in tasks.into_iter().filter(|t| sent.contains(&t.id)) {
        if task.state == TaskState::Running {
            events.extend(target_event(Change::Del, app_id, app_version, task));
        }
        task.mark_killing();
    }
    events
}

/// Split a task id `{app_id}-{index}-{uuid}` into app id and slot index.
fn locate(task_id: &str) -> Option<(&str, u32)> {
    let (slot_id, _) = task_id.rsplit_once('-')?;
    let (app_id, index) = slot_id.rsplit_once('-')?;
    Some((app_id, index.parse().ok()?))
}

/// The endpoint a router should dial for `task`, built from its first
/// port mapping. Tasks without ports produce no event.
fn target_event(
    change: Change,
    app_id: &str,
    app_version: &str,
    task: &Task,
) -> Option<TargetChangeEvent> {
    let container = &task.version.container;
    let Some(mapping) = container.port_mappings.first() else {
        debug!(task = %task.id, "task exposes no ports; no target");
        return None;
    };
    let (ip, port) = match container.network {
        NetworkMode::User(_) => (task.ip.clone(), mapping.container_port),
        NetworkMode::Bridge | NetworkMode::Host => (
            task.agent_hostname.clone(),
            u32::try_from(*task.host_ports.first()?).ok()?,
        ),
    };

    Some(TargetChangeEvent {
        change,
        app_id: app_id.to_string(),
        task_id: task.id.clone(),
        task_ip: ip.unwrap_or_default(),
        task_port: port,
        port_name: mapping.name.clone(),
        version_id: task.version_id.clone(),
        app_version: app_version.to_string(),
        weight: DEFAULT_WEIGHT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use flotilla_core::{Container, PortMapping, Resources};

    fn task_with_host_port(port: u64) -> Task {
        let version = Version {
            id: "v1".to_string(),
            app_name: "web".to_string(),
            run_as: "alice".to_string(),
            instances: 1,
            command: None,
            args: vec![],
            container: Container {
                image: "nginx:1.25".to_string(),
                network: NetworkMode::Bridge,
                privileged: false,
                force_pull_image: false,
                port_mappings: vec![PortMapping {
                    name: "http".to_string(),
                    container_port: 80,
                    protocol: "tcp".to_string(),
                }],
                parameters: vec![],
                volumes: vec![],
            },
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            uris: vec![],
            health_check: None,
            kill_policy: None,
            resources: Resources {
                cpus: 0.1,
                mem: 32.0,
                disk: 0.0,
            },
            ips: vec![],
        };
        let app = App::new("web", "dc1", version).unwrap();
        let mut task = Task::new(app.slots[0].version.clone(), &app.slots[0]);
        task.host_ports = vec![port];
        task.agent_hostname = Some("node-1".to_string());
        task
    }

    #[test]
    fn target_event_uses_first_host_port() {
        let event = target_event(Change::Add, "web", "v1", &task_with_host_port(31000)).unwrap();
        assert_eq!(event.task_ip, "node-1");
        assert_eq!(event.task_port, 31000);
        assert_eq!(event.weight, DEFAULT_WEIGHT);
    }

    #[test]
    fn target_event_skips_ports_that_do_not_fit() {
        let port = u64::from(u32::MAX) + 31000;
        assert!(target_event(Change::Add, "web", "v1", &task_with_host_port(port)).is_none());
    }

    #[test]
    fn locate_splits_task_ids() {
        assert_eq!(locate("web-0-0f3c9a"), Some(("web", 0)));
        assert_eq!(locate("shop-web-12-abc"), Some(("shop-web", 12)));
        assert_eq!(locate("web-x-abc"), None);
        assert_eq!(locate("web"), None);
    }
}
