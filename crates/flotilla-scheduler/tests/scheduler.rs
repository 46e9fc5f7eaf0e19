use std::collections::BTreeMap;
use std::sync::Arc;

use flotilla_core::{Container, KillPolicy, NetworkMode, PortMapping, Resources, Version};
use flotilla_proxy::{Change, TargetChangeEvent, UpstreamLoader};
use flotilla_scheduler::{Scheduler, SchedulerError};
use flotilla_state::proto::{Call, CallKind, Offer, Range, Resource, TaskStatus, WireTaskState};
use flotilla_state::{AppStore, ChannelConnector, ConnectorError, LaunchError, OfferWrapper, TaskState};
use tokio::sync::mpsc;

fn version(id: &str) -> Version {
    Version {
        id: id.to_string(),
        app_name: "web".to_string(),
        run_as: "alice".to_string(),
        instances: 2,
        command: None,
        args: vec![],
        container: Container {
            image: "nginx:1.25".to_string(),
            network: NetworkMode::Bridge,
            privileged: false,
            force_pull_image: false,
            port_mappings: vec![
                PortMapping {
                    name: "http".to_string(),
                    container_port: 80,
                    protocol: "tcp".to_string(),
                },
                PortMapping {
                    name: "admin".to_string(),
                    container_port: 9000,
                    protocol: "tcp".to_string(),
                },
            ],
            parameters: vec![],
            volumes: vec![],
        },
        env: BTreeMap::new(),
        labels: BTreeMap::from([("team".to_string(), "infra".to_string())]),
        uris: vec![],
        health_check: None,
        kill_policy: Some(KillPolicy { duration_ms: 1500 }),
        resources: Resources {
            cpus: 0.5,
            mem: 128.0,
            disk: 0.0,
        },
        ips: vec![],
    }
}

fn offer(id: &str, ports: (u64, u64)) -> OfferWrapper {
    OfferWrapper::new(Offer {
        id: id.to_string(),
        framework_id: "fw-1".to_string(),
        agent_id: "agent-1".to_string(),
        hostname: "node-1".to_string(),
        resources: vec![
            Resource::scalar("cpus", 4.0),
            Resource::scalar("mem", 2048.0),
            Resource::ranges(
                "ports",
                vec![Range {
                    begin: ports.0,
                    end: ports.1,
                }],
            ),
        ],
        attributes: Default::default(),
    })
    .unwrap()
}

struct Harness {
    scheduler: Scheduler,
    calls: mpsc::UnboundedReceiver<Call>,
    events: mpsc::UnboundedReceiver<TargetChangeEvent>,
}

fn harness() -> Harness {
    let (connector, calls) = ChannelConnector::new();
    connector.set_framework_id("fw-1");
    let (tx, events) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(AppStore::new(), Arc::new(connector), tx, "dc1");
    scheduler.register("web", version("v1")).unwrap();
    Harness {
        scheduler,
        calls,
        events,
    }
}

fn current_task_id(h: &Harness, index: u32) -> String {
    h.scheduler
        .store()
        .get("web")
        .unwrap()
        .slot(index)
        .unwrap()
        .current_task
        .as_ref()
        .unwrap()
        .id
        .clone()
}

#[test]
fn register_rejects_duplicates() {
    let h = harness();
    assert_eq!(
        h.scheduler.register("web", version("v1")).unwrap_err(),
        SchedulerError::AppExists("web".to_string())
    );
}

#[test]
fn launch_web_0_consumes_offer_ports() {
    let mut h = harness();
    let mut ow = offer("o1", (31000, 31001));

    let info = h.scheduler.launch("web", 0, &mut ow).unwrap();

    assert_eq!(info.name, "web-0");
    let host_ports: Vec<u64> = info
        .container
        .docker
        .port_mappings
        .iter()
        .map(|m| m.host_port)
        .collect();
    assert_eq!(host_ports, vec![31000, 31001]);
    assert!(ow.ports_remain().is_empty());

    let app = h.scheduler.store().get("web").unwrap();
    let task = app.slot(0).unwrap().current_task.as_ref().unwrap();
    assert_eq!(task.host_ports.len(), app.current_version.container.port_mappings.len());
    assert_eq!(task.id, info.task_id);

    let call = h.calls.try_recv().unwrap();
    let CallKind::Launch { offer_ids, task_infos } = call.kind else {
        panic!("expected launch call");
    };
    assert_eq!(offer_ids, vec!["o1".to_string()]);
    assert_eq!(task_infos, vec![info]);
}

#[test]
fn launch_all_serialises_slots_on_one_offer() {
    let mut h = harness();
    let mut ow = offer("o1", (31000, 31004));

    let infos = h.scheduler.launch_all("web", &mut ow, &[0, 1]).unwrap();
    assert_eq!(infos.len(), 2);
    assert_eq!(ow.ports_remain(), &[31004]);

    let ports = |i: usize| -> Vec<u64> {
        infos[i]
            .container
            .docker
            .port_mappings
            .iter()
            .map(|m| m.host_port)
            .collect()
    };
    assert_eq!(ports(0), vec![31000, 31001]);
    assert_eq!(ports(1), vec![31002, 31003]);

    let CallKind::Launch { task_infos, .. } = h.calls.try_recv().unwrap().kind else {
        panic!("expected launch call");
    };
    assert_eq!(task_infos.len(), 2);
}

#[test]
fn failed_launch_changes_nothing() {
    let mut h = harness();
    let mut ow = offer("o1", (31000, 31002));

    let err = h.scheduler.launch_all("web", &mut ow, &[0, 1]).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Launch(LaunchError::InsufficientPorts { .. })
    ));
    assert_eq!(ow.ports_remain(), &[31000, 31001, 31002]);
    assert!(h.calls.try_recv().is_err());
    let app = h.scheduler.store().get("web").unwrap();
    assert!(app.slots.iter().all(|s| s.current_task.is_none()));
}

#[test]
fn launch_requires_registration() {
    let (connector, _calls) = ChannelConnector::new();
    let (tx, _events) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(AppStore::new(), Arc::new(connector), tx, "dc1");
    scheduler.register("web", version("v1")).unwrap();

    let err = scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap_err();
    assert_eq!(err, SchedulerError::Connector(ConnectorError::NotRegistered));
}

#[test]
fn unknown_app_and_slot() {
    let h = harness();
    let mut ow = offer("o1", (31000, 31001));
    assert_eq!(
        h.scheduler.launch("api", 0, &mut ow).unwrap_err(),
        SchedulerError::AppNotFound("api".to_string())
    );
    assert!(matches!(
        h.scheduler.launch("web", 7, &mut ow),
        Err(SchedulerError::State(_))
    ));
}

#[test]
fn status_updates_drive_target_events() {
    let mut h = harness();
    h.scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap();
    let task_id = current_task_id(&h, 0);

    let transition = h
        .scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Running));
    assert_eq!(transition, Some((TaskState::Created, TaskState::Running)));

    let add = h.events.try_recv().unwrap();
    assert_eq!(add.change, Change::Add);
    assert_eq!(add.app_id, "web");
    assert_eq!(add.task_id, task_id);
    assert_eq!(add.task_ip, "node-1");
    assert_eq!(add.task_port, 31000);
    assert_eq!(add.port_name, "http");
    assert_eq!(add.version_id, "v1");

    // Repeated running updates are not new targets.
    h.scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Running));
    assert!(h.events.try_recv().is_err());

    h.scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Failed));
    let del = h.events.try_recv().unwrap();
    assert_eq!(del.change, Change::Del);

    let app = h.scheduler.store().get("web").unwrap();
    let task = app.slot(0).unwrap().current_task.as_ref().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert!(task.is_archived());
}

#[test]
fn status_for_unknown_task_is_dropped() {
    let mut h = harness();
    assert_eq!(
        h.scheduler
            .handle_status(&TaskStatus::new("web-0-deadbeef", WireTaskState::Running)),
        None
    );
    assert_eq!(
        h.scheduler
            .handle_status(&TaskStatus::new("api-0-deadbeef", WireTaskState::Running)),
        None
    );
    assert_eq!(
        h.scheduler
            .handle_status(&TaskStatus::new("garbage", WireTaskState::Running)),
        None
    );
    assert!(h.events.try_recv().is_err());
}

#[test]
fn kill_sends_grace_period_and_removes_target() {
    let mut h = harness();
    h.scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap();
    let _ = h.calls.try_recv();
    let task_id = current_task_id(&h, 0);
    h.scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Running));
    let _ = h.events.try_recv();

    h.scheduler.kill("web", 0).unwrap();

    let CallKind::Kill {
        task_id: killed,
        agent_id,
        kill_policy,
    } = h.calls.try_recv().unwrap().kind
    else {
        panic!("expected kill call");
    };
    assert_eq!(killed, task_id);
    assert_eq!(agent_id, "agent-1");
    assert_eq!(kill_policy.unwrap().grace_period_nanos, 1_500_000_000);
    assert_eq!(h.events.try_recv().unwrap().change, Change::Del);

    // Confirmation from the cluster does not produce a second removal.
    h.scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Killed));
    assert!(h.events.try_recv().is_err());

    assert_eq!(
        h.scheduler.kill("web", 1).unwrap_err(),
        SchedulerError::NoCurrentTask("web-1".to_string())
    );
}

#[test]
fn scale_down_kills_removed_slots() {
    let mut h = harness();
    h.scheduler
        .launch_all("web", &mut offer("o1", (31000, 31009)), &[0, 1])
        .unwrap();
    let _ = h.calls.try_recv();
    let doomed = current_task_id(&h, 1);

    h.scheduler
        .handle_status(&TaskStatus::new(&doomed, WireTaskState::Running));
    let _ = h.events.try_recv();

    let removed = h.scheduler.scale("web", 1).unwrap();
    assert_eq!(removed, vec!["web-1".to_string()]);
    let del = h.events.try_recv().unwrap();
    assert_eq!((del.change, del.task_id.as_str()), (Change::Del, doomed.as_str()));
    assert_eq!(h.scheduler.store().get("web").unwrap().slots.len(), 1);

    let CallKind::Kill { task_id, .. } = h.calls.try_recv().unwrap().kind else {
        panic!("expected kill call");
    };
    assert_eq!(task_id, doomed);

    let added = h.scheduler.scale("web", 3).unwrap();
    assert!(added.is_empty());
    let app = h.scheduler.store().get("web").unwrap();
    let ids: Vec<&str> = app.slots.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["web-0", "web-1", "web-2"]);
}

#[test]
fn redeploy_keeps_slot_and_task_identity() {
    let h = harness();
    h.scheduler
        .launch_all("web", &mut offer("o1", (31000, 31009)), &[0, 1])
        .unwrap();

    let before = h.scheduler.store().get("web").unwrap();
    let v2 = h.scheduler.redeploy("web", version("v2")).unwrap();
    let after = h.scheduler.store().get("web").unwrap();

    assert_eq!(v2.id, "v2");
    assert_eq!(after.current_version.id, "v2");
    assert_eq!(before.current_version.id, "v1");
    assert!(after.updated_at > before.updated_at);
    for (b, a) in before.slots.iter().zip(&after.slots) {
        assert_eq!(b.id, a.id);
        assert_eq!(
            b.current_task.as_ref().unwrap().id,
            a.current_task.as_ref().unwrap().id
        );
    }

    assert!(matches!(
        h.scheduler.redeploy("api", version("v2")),
        Err(SchedulerError::AppNotFound(_))
    ));
}

#[test]
fn relaunching_a_live_slot_is_refused() {
    let mut h = harness();
    h.scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap();
    let _ = h.calls.try_recv();
    let first = current_task_id(&h, 0);
    h.scheduler
        .handle_status(&TaskStatus::new(&first, WireTaskState::Running));

    let mut o2 = offer("o2", (32000, 32001));
    assert_eq!(
        h.scheduler.launch("web", 0, &mut o2).unwrap_err(),
        SchedulerError::SlotBusy {
            slot_id: "web-0".to_string(),
            task_id: first.clone(),
        }
    );
    assert_eq!(o2.ports_remain(), &[32000, 32001]);
    assert!(h.calls.try_recv().is_err());
    assert_eq!(current_task_id(&h, 0), first);

    // Naming a slot twice in one launch is refused the same way.
    assert!(matches!(
        h.scheduler.launch_all("web", &mut o2, &[1, 1]),
        Err(SchedulerError::SlotBusy { ref slot_id, .. }) if slot_id == "web-1"
    ));
    assert!(h.calls.try_recv().is_err());
}

#[test]
fn relaunch_after_terminal_status_archives_previous_task() {
    let mut h = harness();
    h.scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap();
    let first = current_task_id(&h, 0);
    h.scheduler
        .handle_status(&TaskStatus::new(&first, WireTaskState::Running));
    h.scheduler
        .handle_status(&TaskStatus::new(&first, WireTaskState::Failed));
    while h.events.try_recv().is_ok() {}

    h.scheduler.launch("web", 0, &mut offer("o2", (32000, 32001))).unwrap();

    let app = h.scheduler.store().get("web").unwrap();
    let slot = app.slot(0).unwrap();
    assert_ne!(slot.current_task.as_ref().unwrap().id, first);
    assert_eq!(slot.history.len(), 1);
    assert_eq!(slot.history[0].id, first);
    assert!(slot.history[0].is_archived());

    // A late update for the replaced attempt changes nothing.
    assert_eq!(
        h.scheduler
            .handle_status(&TaskStatus::new(&first, WireTaskState::Running)),
        None
    );
    assert!(h.events.try_recv().is_err());
}

#[test]
fn scale_down_keeps_slots_when_kill_cannot_be_sent() {
    let h = harness();
    h.scheduler
        .launch_all("web", &mut offer("o1", (31000, 31009)), &[0, 1])
        .unwrap();
    let live = current_task_id(&h, 1);
    h.scheduler
        .handle_status(&TaskStatus::new(&live, WireTaskState::Running));

    let Harness {
        scheduler,
        calls,
        mut events,
    } = h;
    drop(calls);
    while events.try_recv().is_ok() {}

    assert_eq!(
        scheduler.scale("web", 1).unwrap_err(),
        SchedulerError::Connector(ConnectorError::Closed)
    );
    let app = scheduler.store().get("web").unwrap();
    assert_eq!(app.slots.len(), 2);
    let task = app.slot(1).unwrap().current_task.as_ref().unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert!(events.try_recv().is_err());

    // The task is still tracked, so its updates are still applied.
    assert_eq!(
        scheduler.handle_status(&TaskStatus::new(&live, WireTaskState::Failed)),
        Some((TaskState::Running, TaskState::Failed))
    );
}

#[test]
fn kill_that_cannot_be_sent_leaves_task_running() {
    let h = harness();
    h.scheduler.launch("web", 0, &mut offer("o1", (31000, 31001))).unwrap();
    let task_id = current_task_id(&h, 0);
    h.scheduler
        .handle_status(&TaskStatus::new(&task_id, WireTaskState::Running));

    let Harness {
        scheduler,
        calls,
        mut events,
    } = h;
    drop(calls);
    while events.try_recv().is_ok() {}

    assert_eq!(
        scheduler.kill("web", 0).unwrap_err(),
        SchedulerError::Connector(ConnectorError::Closed)
    );
    let app = scheduler.store().get("web").unwrap();
    let task = app.slot(0).unwrap().current_task.as_ref().unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn events_feed_the_upstream_loader() {
    let (connector, _calls) = ChannelConnector::new();
    connector.set_framework_id("fw-1");
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(AppStore::new(), Arc::new(connector), tx, "dc1");
    scheduler.register("web", version("v1")).unwrap();
    scheduler
        .launch_all("web", &mut offer("o1", (31000, 31009)), &[0, 1])
        .unwrap();

    let app = scheduler.store().get("web").unwrap();
    let ids: Vec<String> = app
        .slots
        .iter()
        .map(|s| s.current_task.as_ref().unwrap().id.clone())
        .collect();
    for id in &ids {
        scheduler.handle_status(&TaskStatus::new(id, WireTaskState::Running));
    }
    scheduler.handle_status(&TaskStatus::new(&ids[0], WireTaskState::Lost));
    drop(scheduler);

    let loader = UpstreamLoader::new();
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    loader.run(rx, stop_rx).await;

    let upstream = loader.get("web").unwrap();
    assert_eq!(upstream.targets.len(), 1);
    assert_eq!(upstream.targets[0].task_id, ids[1]);
    assert_eq!(upstream.targets[0].endpoint(), "node-1:31002");
}
