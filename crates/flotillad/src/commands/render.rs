use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use flotilla_core::{DaemonConfig, Version};
use flotilla_scheduler::Scheduler;
use flotilla_state::proto::{Call, Offer};
use flotilla_state::{AppStore, ChannelConnector, OfferWrapper};
use tokio::sync::mpsc;
use tracing::info;

use super::app_id_from_path;

pub fn render(
    config: &DaemonConfig,
    app_path: &Path,
    offer_path: &Path,
    app_id: Option<&str>,
    slots: &[u32],
) -> anyhow::Result<()> {
    let call = render_call(config, app_path, offer_path, app_id, slots)?;
    println!("{}", serde_json::to_string_pretty(&call)?);
    Ok(())
}

/// Run one launch pass for the app against the offer and return the call
/// that would be sent. Nothing leaves the process.
pub fn render_call(
    config: &DaemonConfig,
    app_path: &Path,
    offer_path: &Path,
    app_id: Option<&str>,
    slots: &[u32],
) -> anyhow::Result<Call> {
    let version = Version::from_file(app_path)?;
    let app_id = match app_id {
        Some(id) => id.to_string(),
        None => app_id_from_path(app_path)?,
    };

    let raw = std::fs::read_to_string(offer_path)
        .with_context(|| format!("failed to read {}", offer_path.display()))?;
    let offer: Offer = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse offer {}", offer_path.display()))?;

    let (connector, mut calls) = ChannelConnector::new();
    connector.set_framework_id(offer.framework_id.clone());
    let (events, _) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(
        AppStore::new(),
        Arc::new(connector),
        events,
        &config.cluster_id,
    );

    let app = scheduler.register(&app_id, version)?;
    let indices: Vec<u32> = if slots.is_empty() {
        app.slots.iter().map(|s| s.index).collect()
    } else {
        slots.to_vec()
    };

    let mut offer = OfferWrapper::new(offer)?;
    scheduler.launch_all(&app_id, &mut offer, &indices)?;
    let call = calls.try_recv().context("no launch call was produced")?;

    info!(
        app = %app_id,
        offer = %offer.id(),
        tasks = indices.len(),
        ports_left = ?offer.ports_remain(),
        "rendered launch call"
    );
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_state::proto::CallKind;

    const APP: &str = r#"
id = "v1"
appName = "web"
runAs = "alice"
instances = 2

[container]
image = "nginx:1.25"

[[container.portMappings]]
name = "http"
containerPort = 80

[resources]
cpus = 0.5
mem = 128.0
"#;

    const OFFER: &str = r#"{
        "id": "o1",
        "framework_id": "fw-1",
        "agent_id": "agent-1",
        "hostname": "node-1",
        "resources": [
            {"name": "cpus", "type": "scalar", "value": 2.0},
            {"name": "mem", "type": "scalar", "value": 1024.0},
            {"name": "ports", "type": "ranges", "ranges": [{"begin": 31000, "end": 31005}]}
        ]
    }"#;

    fn config() -> DaemonConfig {
        DaemonConfig {
            cluster_id: "dc1".to_string(),
            log: Default::default(),
        }
    }

    #[test]
    fn renders_every_slot_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("web.toml");
        let offer = dir.path().join("offer.json");
        std::fs::write(&app, APP).unwrap();
        std::fs::write(&offer, OFFER).unwrap();

        let call = render_call(&config(), &app, &offer, None, &[]).unwrap();
        assert_eq!(call.framework_id, "fw-1");
        let CallKind::Launch { offer_ids, task_infos } = call.kind else {
            panic!("expected launch call");
        };
        assert_eq!(offer_ids, vec!["o1".to_string()]);
        let names: Vec<&str> = task_infos.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["web-0", "web-1"]);
        assert!(
            task_infos[0]
                .labels
                .iter()
                .any(|l| l.key == "DM_CLUSTER" && l.value == "dc1")
        );
    }

    #[test]
    fn explicit_app_id_and_slots() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("web.toml");
        let offer = dir.path().join("offer.json");
        std::fs::write(&app, APP).unwrap();
        std::fs::write(&offer, OFFER).unwrap();

        let call = render_call(&config(), &app, &offer, Some("shop"), &[1]).unwrap();
        let CallKind::Launch { task_infos, .. } = call.kind else {
            panic!("expected launch call");
        };
        assert_eq!(task_infos.len(), 1);
        assert_eq!(task_infos[0].name, "shop-1");
    }

    #[test]
    fn missing_offer_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("web.toml");
        std::fs::write(&app, APP).unwrap();

        let err = render_call(&config(), &app, &dir.path().join("nope.json"), None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
