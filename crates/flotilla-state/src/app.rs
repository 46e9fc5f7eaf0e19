//! Applications and their replica slots.

use std::collections::BTreeMap;
use std::sync::Arc;

use flotilla_core::Version;
use flotilla_core::selector::Set;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::now_millis;
use crate::task::Task;

/// How slots get their network identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Slots are interchangeable; the network assigns addresses.
    Replicates,
    /// Each slot keeps a stable IP across task replacements.
    Fixed,
}

/// A deployed application and its replica slots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub current_version: Arc<Version>,
    pub mode: AppMode,
    pub slots: Vec<Slot>,
    /// Unix millis.
    pub created_at: u64,
    /// Unix millis of the last redeploy.
    pub updated_at: u64,
}

/// One stable replica position within an app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub index: u32,
    /// `{app_id}-{index}`, stable for the replica's lifetime.
    pub id: String,
    pub app_id: String,
    /// The version this slot should run.
    pub version: Arc<Version>,
    pub ip: Option<String>,
    pub current_task: Option<Task>,
    /// Earlier attempts, oldest first. Kept for audit only.
    pub history: Vec<Task>,
}

impl Slot {
    pub fn new(app_id: &str, index: u32, version: Arc<Version>, ip: Option<String>) -> Self {
        Self {
            index,
            id: slot_id(app_id, index),
            app_id: app_id.to_string(),
            version,
            ip,
            current_task: None,
            history: Vec::new(),
        }
    }

    /// Make `task` the current attempt, archiving the previous one.
    pub fn set_current_task(&mut self, task: Task) {
        if let Some(mut previous) = self.current_task.replace(task) {
            previous.archive_at(now_millis());
            self.history.push(previous);
        }
    }

    /// Find the current or a historical task by id.
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        if self.current_task.as_ref().is_some_and(|t| t.id == task_id) {
            return self.current_task.as_mut();
        }
        self.history.iter_mut().find(|t| t.id == task_id)
    }
}

/// Build the slot id for `index` of `app_id`.
pub fn slot_id(app_id: &str, index: u32) -> String {
    format!("{app_id}-{index}")
}

impl App {
    /// Create an app with one slot per desired instance.
    pub fn new(id: &str, cluster_id: &str, version: Version) -> StateResult<Self> {
        version.validate()?;
        let mode = if version.is_fixed() {
            AppMode::Fixed
        } else {
            AppMode::Replicates
        };
        let version = Arc::new(version);
        let now = now_millis();

        let mut app = Self {
            id: id.to_string(),
            name: version.app_name.clone(),
            cluster_id: cluster_id.to_string(),
            current_version: version.clone(),
            mode,
            slots: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        app.scale(version.instances)?;
        info!(app = %app.id, slots = app.slots.len(), ?mode, "app created");
        Ok(app)
    }

    pub fn is_fixed(&self) -> bool {
        self.mode == AppMode::Fixed
    }

    /// Labels of the current version, used by label selectors.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.current_version.labels
    }

    /// Derived field set evaluated by field selectors.
    pub fn fields(&self) -> Set {
        Set::from([("runAs".to_string(), self.current_version.run_as.clone())])
    }

    pub fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.index == index)
    }

    pub fn slot_mut(&mut self, index: u32) -> StateResult<&mut Slot> {
        let app_id = self.id.clone();
        self.slots
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or(StateError::SlotNotFound { app_id, index })
    }

    /// Point the app at a new version. Slots keep their identity and keep
    /// running what they run until they are relaunched.
    pub fn redeploy(&mut self, version: Version) -> StateResult<Arc<Version>> {
        version.validate()?;
        if version.is_fixed() != self.is_fixed() {
            return Err(StateError::NetworkModeChange {
                app_id: self.id.clone(),
            });
        }
        let version = Arc::new(version);
        let previous = std::mem::replace(&mut self.current_version, version.clone());
        self.updated_at = now_millis().max(self.updated_at + 1);
        info!(app = %self.id, from = %previous.id, to = %version.id, "app redeployed");
        Ok(version)
    }

    /// Grow or shrink to `target` slots. Returns the removed slots, whose
    /// tasks the caller is responsible for killing.
    pub fn scale(&mut self, target: u32) -> StateResult<Vec<Slot>> {
        let current = self.slots.len() as u32;

        if target > current {
            let ips = &self.current_version.ips;
            if self.is_fixed() && ips.len() < target as usize {
                return Err(StateError::NoIpForSlot {
                    app_id: self.id.clone(),
                    index: (ips.len() as u32).max(current),
                });
            }
            for index in current..target {
                let ip = self
                    .is_fixed()
                    .then(|| ips[index as usize].clone());
                self.slots
                    .push(Slot::new(&self.id, index, self.current_version.clone(), ip));
            }
            debug!(app = %self.id, from = current, to = target, "slots added");
            Ok(Vec::new())
        } else {
            let removed = self.slots.split_off(target as usize);
            if !removed.is_empty() {
                debug!(app = %self.id, from = current, to = target, "slots removed");
            }
            Ok(removed)
        }
    }
}
