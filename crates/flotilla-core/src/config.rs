//! `flotilla.toml` daemon configuration and application file loading.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::version::{Version, VersionError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid application version: {0}")]
    Invalid(#[from] VersionError),
}

/// Daemon-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Cluster identifier stamped onto every launched task.
    pub cluster_id: String,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_filter() -> String {
    "info,flotilla=debug".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        let config: DaemonConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(?path, cluster_id = %config.cluster_id, "daemon config loaded");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Version {
    /// Load an application version from a `.toml` or `.json` file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        let parse_err = |reason: String| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        };

        let version: Version = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };
        version.validate()?;
        Ok(version)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::NetworkMode;

    const APP_TOML: &str = r#"
id = "v1"
appName = "web"
runAs = "alice"
instances = 2

[container]
image = "nginx:1.25"
network = "bridge"

[[container.portMappings]]
name = "http"
containerPort = 80

[resources]
cpus = 0.5
mem = 128.0

[labels]
team = "infra"
"#;

    #[test]
    fn parse_minimal_daemon_config() {
        let config: DaemonConfig = toml::from_str(r#"cluster_id = "dc1""#).unwrap();
        assert_eq!(config.cluster_id, "dc1");
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn daemon_config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flotilla.toml");
        let config = DaemonConfig {
            cluster_id: "dc1".to_string(),
            log: LogConfig {
                filter: "debug".to_string(),
                format: LogFormat::Json,
            },
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(DaemonConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn load_version_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.toml");
        std::fs::write(&path, APP_TOML).unwrap();

        let v = Version::from_file(&path).unwrap();
        assert_eq!(v.app_name, "web");
        assert_eq!(v.container.network, NetworkMode::Bridge);
        assert_eq!(v.container.port_mappings[0].protocol, "tcp");
        assert_eq!(v.labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn invalid_version_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, APP_TOML.replace("nginx:1.25", "")).unwrap();

        assert!(matches!(
            Version::from_file(&path),
            Err(ConfigError::Invalid(VersionError::MissingImage))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = DaemonConfig::from_file(Path::new("/nonexistent/flotilla.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
