//! Versioned application specs.
//!
//! A [`Version`] is an immutable snapshot of everything needed to launch one
//! replica of an application. Every (re)deploy creates a new `Version`;
//! slots and tasks hold it behind an `Arc` and never mutate it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable deployable definition of an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Unique version identifier (assigned at deploy time).
    pub id: String,
    /// Name of the application this version belongs to.
    pub app_name: String,
    /// Operator user the workload runs on behalf of.
    pub run_as: String,
    /// Desired replica count.
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Shell command. When set and `args` is empty the command runs via a shell.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub container: Container,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// User-defined labels, attached to launched tasks.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// URIs fetched into the sandbox before launch.
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub kill_policy: Option<KillPolicy>,
    pub resources: Resources,
    /// Fixed IPs, one per slot. Non-empty switches the app to fixed-IP networking.
    #[serde(default)]
    pub ips: Vec<String>,
}

fn default_instances() -> u32 {
    1
}

/// Docker container definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub force_pull_image: bool,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Extra `docker run` parameters (`--key=value`).
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

/// Container network mode. Anything other than `bridge`/`host` names a
/// user-defined network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
    User(String),
}

impl From<String> for NetworkMode {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "bridge" | "" => NetworkMode::Bridge,
            "host" => NetworkMode::Host,
            _ => NetworkMode::User(s),
        }
    }
}

impl From<NetworkMode> for String {
    fn from(mode: NetworkMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Bridge => f.write_str("bridge"),
            NetworkMode::Host => f.write_str("host"),
            NetworkMode::User(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub name: String,
    pub container_port: u32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeMode {
    Ro,
    #[default]
    Rw,
}

/// Health check definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub protocol: HealthProtocol,
    /// HTTP path, for `http` checks.
    #[serde(default)]
    pub path: Option<String>,
    /// Port mapping name to probe, for `http`/`tcp` checks.
    #[serde(default)]
    pub port_name: Option<String>,
    /// Command to run, for `cmd` checks.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub delay_seconds: f64,
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub grace_period_seconds: f64,
    #[serde(default = "default_failures")]
    pub consecutive_failures: u32,
}

fn default_interval() -> f64 {
    10.0
}

fn default_timeout() -> f64 {
    20.0
}

fn default_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthProtocol {
    Http,
    Tcp,
    Cmd,
}

/// Grace period applied when killing a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillPolicy {
    /// Grace duration in milliseconds. Zero means no grace period.
    #[serde(alias = "duration")]
    pub duration_ms: u64,
}

impl KillPolicy {
    /// Grace period in nanoseconds, or `None` for a zero duration.
    pub fn grace_period_nanos(&self) -> Option<i64> {
        if self.duration_ms == 0 {
            return None;
        }
        let nanos = i128::from(self.duration_ms) * 1_000_000;
        Some(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// Per-task resource needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    /// Memory in MB.
    pub mem: f64,
    /// Disk in MB.
    #[serde(default)]
    pub disk: f64,
}

/// Reasons a [`Version`] cannot be deployed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version id must not be empty")]
    MissingId,

    #[error("container image must not be empty")]
    MissingImage,

    #[error("duplicate port mapping name: {0}")]
    DuplicatePortName(String),

    #[error("health check references unknown port {0:?}")]
    UnknownHealthPort(String),

    #[error("{protocol} health check needs {field}")]
    IncompleteHealthCheck {
        protocol: &'static str,
        field: &'static str,
    },

    #[error("fixed-ip app needs {needed} ips, got {got}")]
    NotEnoughIps { needed: u32, got: usize },

    #[error("resources must be non-negative with cpus and mem above zero")]
    InvalidResources,
}

impl Version {
    /// True when each slot gets a stable IP from `ips`.
    pub fn is_fixed(&self) -> bool {
        !self.ips.is_empty()
    }

    pub fn port_mapping(&self, name: &str) -> Option<(usize, &PortMapping)> {
        self.container
            .port_mappings
            .iter()
            .enumerate()
            .find(|(_, pm)| pm.name == name)
    }

    /// Check the version is launchable before it is accepted into the registry.
    pub fn validate(&self) -> Result<(), VersionError> {
        if self.id.trim().is_empty() {
            return Err(VersionError::MissingId);
        }
        if self.container.image.trim().is_empty() {
            return Err(VersionError::MissingImage);
        }

        let r = &self.resources;
        if !(r.cpus > 0.0 && r.mem > 0.0 && r.disk >= 0.0) {
            return Err(VersionError::InvalidResources);
        }

        let mut seen = HashSet::new();
        for pm in &self.container.port_mappings {
            if !seen.insert(pm.name.as_str()) {
                return Err(VersionError::DuplicatePortName(pm.name.clone()));
            }
        }

        if let Some(hc) = &self.health_check {
            match hc.protocol {
                HealthProtocol::Http | HealthProtocol::Tcp => {
                    let proto = if hc.protocol == HealthProtocol::Http { "http" } else { "tcp" };
                    let port = hc.port_name.as_deref().ok_or(VersionError::IncompleteHealthCheck {
                        protocol: proto,
                        field: "portName",
                    })?;
                    if self.port_mapping(port).is_none() {
                        return Err(VersionError::UnknownHealthPort(port.to_string()));
                    }
                }
                HealthProtocol::Cmd => {
                    if hc.command.as_deref().is_none_or(str::is_empty) {
                        return Err(VersionError::IncompleteHealthCheck {
                            protocol: "cmd",
                            field: "command",
                        });
                    }
                }
            }
        }

        if self.is_fixed() && self.ips.len() < self.instances as usize {
            return Err(VersionError::NotEnoughIps {
                needed: self.instances,
                got: self.ips.len(),
            });
        }
        Ok(())
    }
}
