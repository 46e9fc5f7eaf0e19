//! Upstream target tables, maintained from [`TargetChangeEvent`]s.
//!
//! One upstream per app; each holds one target per task. The last target
//! leaving takes its upstream with it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::event::{Change, TargetChangeEvent};

/// One routable task endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub app_id: String,
    pub task_id: String,
    pub task_ip: String,
    pub task_port: u32,
    pub port_name: String,
    pub version_id: String,
    pub app_version: String,
    pub weight: f64,
}

impl Target {
    /// `ip:port` as a proxy would dial it.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.task_ip, self.task_port)
    }
}

impl From<&TargetChangeEvent> for Target {
    fn from(event: &TargetChangeEvent) -> Self {
        Self {
            app_id: event.app_id.clone(),
            task_id: event.task_id.clone(),
            task_ip: event.task_ip.clone(),
            task_port: event.task_port,
            port_name: event.port_name.clone(),
            version_id: event.version_id.clone(),
            app_version: event.app_version.clone(),
            weight: event.weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub app_id: String,
    pub targets: Vec<Target>,
}

impl Upstream {
    pub fn target(&self, task_id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.task_id == task_id)
    }

    fn matches(&self, app_id: &str) -> bool {
        normalize_app_id(&self.app_id) == normalize_app_id(app_id)
    }
}

/// App ids compare case-insensitively with `-` and `.` treated alike.
pub fn normalize_app_id(app_id: &str) -> String {
    app_id.replace('-', ".").to_lowercase()
}

/// Shared table of upstreams. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct UpstreamLoader {
    upstreams: Arc<RwLock<Vec<Upstream>>>,
}

impl UpstreamLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Upstream>> {
        self.upstreams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Upstream>> {
        self.upstreams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one event into the table.
    pub fn apply(&self, event: &TargetChangeEvent) {
        let mut upstreams = self.write();
        let pos = upstreams.iter().position(|u| u.matches(&event.app_id));

        match event.change {
            Change::Add => match pos {
                Some(i) => {
                    let upstream = &mut upstreams[i];
                    if upstream.target(&event.task_id).is_none() {
                        upstream.targets.push(Target::from(event));
                        debug!(app = %event.app_id, task = %event.task_id, "target added");
                    }
                }
                None => {
                    upstreams.push(Upstream {
                        app_id: event.app_id.clone(),
                        targets: vec![Target::from(event)],
                    });
                    info!(app = %event.app_id, task = %event.task_id, "upstream created");
                }
            },
            Change::Del => {
                let Some(i) = pos else {
                    return;
                };
                upstreams[i].targets.retain(|t| t.task_id != event.task_id);
                debug!(app = %event.app_id, task = %event.task_id, "target removed");
                if upstreams[i].targets.is_empty() {
                    upstreams.remove(i);
                    info!(app = %event.app_id, "upstream removed with its last target");
                }
            }
            Change::Change => {
                let Some(i) = pos else {
                    warn!(app = %event.app_id, "no upstream for weight change");
                    return;
                };
                match upstreams[i]
                    .targets
                    .iter_mut()
                    .find(|t| t.task_id == event.task_id)
                {
                    Some(target) => {
                        target.weight = event.weight;
                        debug!(task = %event.task_id, weight = event.weight, "target re-weighted");
                    }
                    None => {
                        warn!(app = %event.app_id, task = %event.task_id, "no target for weight change");
                    }
                }
            }
        }
    }

    /// Apply events from `rx` until shutdown is signalled or every sender
    /// is gone.
    pub async fn run(
        &self,
        mut rx: mpsc::UnboundedReceiver<TargetChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("upstream loader listening for target events");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("upstream loader shutting down");
                    return;
                }
                event = rx.recv() => match event {
                    Some(event) => self.apply(&event),
                    None => {
                        debug!("target event channel closed");
                        return;
                    }
                },
            }
        }
    }

    /// The upstream for `app_id`, matched after normalisation.
    pub fn get(&self, app_id: &str) -> Option<Upstream> {
        self.read().iter().find(|u| u.matches(app_id)).cloned()
    }

    /// A copy of every upstream in the table.
    pub fn list(&self) -> Vec<Upstream> {
        self.read().clone()
    }
}
