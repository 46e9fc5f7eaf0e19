//! Launch descriptor builder.
//!
//! [`TaskBuilder`] assembles a [`TaskInfo`] from independent steps. Each
//! step consumes the builder and returns it, so a descriptor is only ever
//! observed once [`TaskBuilder::build`] hands it out. Steps do not read
//! each other's output except where noted: `health_check` resolves its port
//! through the mappings produced by `network`.

use std::collections::BTreeMap;

use flotilla_core::{Container, HealthCheck, HealthProtocol, NetworkMode, PortMapping, VolumeMode};

use crate::app::{App, Slot};
use crate::error::LaunchError;
use crate::offer::Allocation;
use crate::proto::*;

pub const LABEL_USER: &str = "DM_USER";
pub const LABEL_CLUSTER: &str = "DM_CLUSTER";
pub const LABEL_SLOT_INDEX: &str = "DM_SLOT_INDEX";
pub const LABEL_SLOT_ID: &str = "DM_SLOT_ID";
pub const LABEL_TASK_ID: &str = "DM_TASK_ID";
pub const LABEL_APP_NAME: &str = "DM_APP_NAME";
pub const LABEL_APP_ID: &str = "DM_APP_ID";

/// The fixed label set stamped on every task.
///
/// It reaches the descriptor through two channels: structured task labels
/// and `label` docker parameters. Both are rendered from [`Self::iter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultLabels {
    pairs: [(&'static str, String); 7],
}

impl DefaultLabels {
    pub fn new(app: &App, slot: &Slot, task_id: &str) -> Self {
        Self {
            pairs: [
                (LABEL_USER, slot.version.run_as.clone()),
                (LABEL_CLUSTER, app.cluster_id.clone()),
                (LABEL_SLOT_INDEX, slot.index.to_string()),
                (LABEL_SLOT_ID, slot.id.clone()),
                (LABEL_TASK_ID, task_id.to_string()),
                (LABEL_APP_NAME, app.name.clone()),
                (LABEL_APP_ID, app.id.clone()),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// `label` docker parameters, one `key=value` per default label.
    pub fn to_parameters(&self) -> Vec<Parameter> {
        self.iter()
            .map(|(k, v)| Parameter::new("label", format!("{k}={v}")))
            .collect()
    }
}

/// Assembles a [`TaskInfo`] step by step. Each step consumes the builder
/// and returns it; [`TaskBuilder::build`] hands back the descriptor and the
/// host ports it was given.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    info: TaskInfo,
    host_ports: Vec<u64>,
    /// Port name → port a health check should probe.
    probe_ports: BTreeMap<String, u64>,
}

impl TaskBuilder {
    /// Start a descriptor named `name` (the slot id) for `task_id` on
    /// `agent_id`.
    pub fn new(name: &str, task_id: &str, agent_id: &str) -> Self {
        Self {
            info: TaskInfo {
                name: name.to_string(),
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
                ..TaskInfo::default()
            },
            host_ports: Vec::new(),
            probe_ports: BTreeMap::new(),
        }
    }

    pub fn resources(mut self, allocation: &Allocation) -> Self {
        self.info.resources = allocation.to_resources();
        self
    }

    /// A command without arguments runs through the shell; otherwise the
    /// command (or the image entrypoint) is exec'd with `args`.
    pub fn command(mut self, command: Option<&str>, args: &[String]) -> Self {
        let command = command.filter(|c| !c.is_empty());
        self.info.command.shell = command.is_some() && args.is_empty();
        self.info.command.value = command.map(str::to_string);
        self.info.command.arguments = args.to_vec();
        self
    }

    pub fn docker(mut self, container: &Container) -> Self {
        let docker = &mut self.info.container.docker;
        self.info.container.kind = ContainerType::Docker;
        docker.image = container.image.clone();
        docker.privileged = container.privileged;
        docker.force_pull_image = container.force_pull_image;
        self.info
            .container
            .volumes
            .extend(container.volumes.iter().map(|v| VolumeInfo {
                container_path: v.container_path.clone(),
                host_path: v.host_path.clone(),
                mode: match v.mode {
                    VolumeMode::Ro => VolumeAccess::Ro,
                    VolumeMode::Rw => VolumeAccess::Rw,
                },
            }));
        self
    }

    pub fn environment(mut self, env: &BTreeMap<String, String>) -> Self {
        self.info
            .command
            .environment
            .extend(env.iter().map(|(name, value)| EnvVar {
                name: name.clone(),
                value: value.clone(),
            }));
        self
    }

    pub fn uris(mut self, uris: &[String]) -> Self {
        self.info.command.uris = uris
            .iter()
            .map(|u| CommandUri {
                value: u.clone(),
                extract: is_archive(u),
            })
            .collect();
        self
    }

    /// Append labels. A key that is already present keeps its position and
    /// takes the new value.
    pub fn labels<'a>(mut self, labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (key, value) in labels {
            match self.info.labels.iter_mut().find(|l| l.key == key) {
                Some(existing) => existing.value = value.to_string(),
                None => self.info.labels.push(Label {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
            }
        }
        self
    }

    pub fn parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.info.container.docker.parameters.extend(parameters);
        self
    }

    /// Configure networking and bind one host port per port mapping.
    ///
    /// `host_ports` comes from the offer allocation, in mapping order.
    pub fn network(
        mut self,
        mode: &NetworkMode,
        mappings: &[PortMapping],
        host_ports: &[u64],
    ) -> Result<Self, LaunchError> {
        if host_ports.len() < mappings.len() {
            return Err(LaunchError::PortCountMismatch {
                expected: mappings.len(),
                got: host_ports.len(),
            });
        }
        let host_ports = &host_ports[..mappings.len()];

        let docker = &mut self.info.container.docker;
        docker.network = match mode {
            NetworkMode::Bridge => DockerNetwork::Bridge,
            NetworkMode::Host => DockerNetwork::Host,
            NetworkMode::User(name) => {
                self.info.container.network_infos = vec![NetworkInfo { name: name.clone() }];
                DockerNetwork::User
            }
        };

        for (pm, &host_port) in mappings.iter().zip(host_ports) {
            match mode {
                // Host networking has no translation; the app listens on the host port.
                NetworkMode::Host => {
                    self.probe_ports.insert(pm.name.clone(), host_port);
                }
                NetworkMode::Bridge | NetworkMode::User(_) => {
                    docker.port_mappings.push(DockerPortMapping {
                        host_port,
                        container_port: pm.container_port,
                        protocol: pm.protocol.clone(),
                    });
                    self.probe_ports
                        .insert(pm.name.clone(), u64::from(pm.container_port));
                }
            }
        }
        self.host_ports = host_ports.to_vec();
        Ok(self)
    }

    pub fn health_check(mut self, hc: &HealthCheck) -> Result<Self, LaunchError> {
        let port = |builder: &Self| -> Result<u64, LaunchError> {
            let name = hc
                .port_name
                .as_deref()
                .ok_or(LaunchError::IncompleteHealthCheck("portName"))?;
            builder
                .probe_ports
                .get(name)
                .copied()
                .ok_or_else(|| LaunchError::UnknownHealthPort(name.to_string()))
        };

        let check = match hc.protocol {
            HealthProtocol::Http => HealthCheckKind::Http {
                port: port(&self)?,
                path: hc.path.clone().unwrap_or_else(|| "/".to_string()),
            },
            HealthProtocol::Tcp => HealthCheckKind::Tcp { port: port(&self)? },
            HealthProtocol::Cmd => HealthCheckKind::Command {
                value: hc
                    .command
                    .clone()
                    .ok_or(LaunchError::IncompleteHealthCheck("command"))?,
            },
        };

        self.info.health_check = Some(HealthCheckInfo {
            delay_seconds: hc.delay_seconds,
            interval_seconds: hc.interval_seconds,
            timeout_seconds: hc.timeout_seconds,
            grace_period_seconds: hc.grace_period_seconds,
            consecutive_failures: hc.consecutive_failures,
            check,
        });
        Ok(self)
    }

    /// Host ports bound by [`Self::network`].
    pub fn host_ports(&self) -> &[u64] {
        &self.host_ports
    }

    pub fn build(self) -> (TaskInfo, Vec<u64>) {
        (self.info, self.host_ports)
    }
}

fn is_archive(uri: &str) -> bool {
    [".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".zip"]
        .iter()
        .any(|ext| uri.ends_with(ext))
}
