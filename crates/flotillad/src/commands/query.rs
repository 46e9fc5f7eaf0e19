use std::path::{Path, PathBuf};

use flotilla_core::{DaemonConfig, Version};
use flotilla_state::{App, AppStore};
use tracing::debug;

use super::app_id_from_path;

pub fn query(
    config: &DaemonConfig,
    apps: &[PathBuf],
    labels: Option<&str>,
    fields: Option<&str>,
) -> anyhow::Result<()> {
    for id in matching_ids(config, apps, labels, fields)? {
        println!("{id}");
    }
    Ok(())
}

/// Load every app file into a fresh registry and return the ids matching
/// the selectors, most recently updated first.
pub fn matching_ids(
    config: &DaemonConfig,
    apps: &[PathBuf],
    labels: Option<&str>,
    fields: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let store = AppStore::new();
    for path in apps {
        let path = path.as_path();
        let id = app_id_from_path(path)?;
        let version = Version::from_file(path)?;
        store.add(App::new(&id, &config.cluster_id, version)?);
        debug!(app = %id, path = %path.display(), "app file loaded");
    }

    let matched = store.query(labels, fields)?;
    Ok(matched.iter().map(|app| app.id.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_file(dir: &Path, name: &str, team: &str, run_as: &str) -> PathBuf {
        let path = dir.join(format!("{name}.toml"));
        let content = format!(
            r#"
id = "v1"
appName = "{name}"
runAs = "{run_as}"

[container]
image = "busybox"

[resources]
cpus = 0.1
mem = 32.0

[labels]
team = "{team}"
"#
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn selects_by_label_and_field() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            cluster_id: "dc1".to_string(),
            log: Default::default(),
        };
        let files = vec![
            app_file(dir.path(), "web", "infra", "alice"),
            app_file(dir.path(), "api", "payments", "bob"),
            app_file(dir.path(), "db", "infra", "bob"),
        ];

        let mut infra = matching_ids(&config, &files, Some("team=infra"), None).unwrap();
        infra.sort();
        assert_eq!(infra, vec!["db", "web"]);

        let bob_infra =
            matching_ids(&config, &files, Some("team=infra"), Some("runAs=bob")).unwrap();
        assert_eq!(bob_infra, vec!["db"]);

        assert!(matching_ids(&config, &files, Some("team in ("), None).is_err());
    }
}
