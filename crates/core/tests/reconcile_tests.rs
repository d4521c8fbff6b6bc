use std::collections::BTreeMap;

use discovery_core::address::AddressResolver;
use discovery_core::derive::{derive, Derived, DeriveSettings};
use discovery_core::diff::{delta, delta_checks, CheckMode};
use discovery_core::generation::GenerationStore;
use discovery_core::index::NodeIndex;
use discovery_core::model::{
    CheckBody, Framework, HealthCheckRecord, Label, Node, ServiceRecord, Snapshot, StatusUpdate, Task, TASK_RUNNING,
};
use discovery_core::template::HEALTH_CHECK_LABEL;

fn node(i: usize) -> Node {
    Node {
        id: format!("S{i}"),
        host: format!("10.0.0.{}", i + 1),
        port: "5051".to_string(),
        hostname: format!("agent{i}.dc1.example"),
        master: i == 2,
    }
}

fn task(id: &str, ports: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        name: "web".to_string(),
        node_id: "S2".to_string(),
        state: TASK_RUNNING.to_string(),
        ports: ports.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

/// Five nodes, the leader on S2, one framework with three tasks on S2.
fn cluster() -> Snapshot {
    Snapshot {
        leader: "master@10.0.0.3:5050".to_string(),
        nodes: (0..5).map(node).collect(),
        frameworks: vec![Framework {
            id: "F0".to_string(),
            name: "Marathon".to_string(),
            host: "10.0.0.3".to_string(),
            port: "8080".to_string(),
            hostname: "agent2.dc1.example".to_string(),
            active: true,
            tasks: vec![task("web.1", &["80", "443"]), task("web.2", &[]), task("web.3", &[])],
        }],
    }
}

fn run(snapshot: &Snapshot) -> Derived {
    derive(
        snapshot,
        &NodeIndex::build(snapshot),
        &AddressResolver::default(),
        &DeriveSettings::default(),
    )
}

#[test]
fn test_end_to_end_record_counts() {
    let d = run(&cluster());
    assert!(d.skipped.is_empty());
    assert_eq!(d.nodes.len(), 5);
    assert_eq!(d.frameworks.len(), 1);
    assert_eq!(d.tasks.len(), 4);

    let leaders: Vec<_> = d
        .nodes
        .iter()
        .filter(|p| p.record.tags.contains("leader"))
        .map(|p| p.node_id.as_str())
        .collect();
    assert_eq!(leaders, vec!["S2"]);

    let fw = &d.frameworks[0];
    assert_eq!(fw.node_id, "S2");
    assert_eq!(fw.record.id, "mesos-dns:Marathon");
    assert_eq!(fw.record.name, "marathon");
    assert!(fw.record.tags.is_empty());
    assert!(d.tasks.iter().all(|p| p.node_id == "S2"));
}

#[test]
fn test_port_fan_out() {
    let d = run(&cluster());
    let ids: Vec<(&str, u16)> = d.tasks.iter().map(|p| (p.record.id.as_str(), p.record.port)).collect();
    assert_eq!(
        ids,
        vec![
            ("mesos-dns:agent2:web.1:80", 80),
            ("mesos-dns:agent2:web.1:443", 443),
            ("mesos-dns:agent2:web.2", 0),
            ("mesos-dns:agent2:web.3", 0),
        ]
    );
    assert!(d
        .tasks
        .iter()
        .all(|p| p.record.tags.iter().map(String::as_str).eq(["agent2"])));
}

#[test]
fn test_address_precedence_docker_over_host() {
    let mut snapshot = cluster();
    let t = &mut snapshot.frameworks[0].tasks[1];
    t.addresses = BTreeMap::from([("docker".to_string(), "172.17.0.5".to_string())]);
    let resolver = AddressResolver::parse(&["docker", "host"]).unwrap();
    let d = derive(&snapshot, &NodeIndex::build(&snapshot), &resolver, &DeriveSettings::default());

    let web2 = d.tasks.iter().find(|p| p.record.id.ends_with("web.2")).unwrap();
    assert_eq!(web2.record.address, "172.17.0.5");
    let web3 = d.tasks.iter().find(|p| p.record.id.ends_with("web.3")).unwrap();
    assert_eq!(web3.record.address, "10.0.0.3");
}

#[test]
fn test_label_address_source() {
    let mut snapshot = cluster();
    snapshot.frameworks[0].tasks[2].statuses = vec![StatusUpdate {
        labels: vec![Label {
            key: "overlay_ip".to_string(),
            value: "192.168.50.9".to_string(),
        }],
    }];
    let resolver = AddressResolver::parse(&["label:overlay_ip", "host"]).unwrap();
    let d = derive(&snapshot, &NodeIndex::build(&snapshot), &resolver, &DeriveSettings::default());
    let web3 = d.tasks.iter().find(|p| p.record.id.ends_with("web.3")).unwrap();
    assert_eq!(web3.record.address, "192.168.50.9");
}

#[test]
fn test_check_requests_follow_task_records() {
    let mut snapshot = cluster();
    snapshot.frameworks[0].tasks[0].labels = vec![Label {
        key: HEALTH_CHECK_LABEL.to_string(),
        value: "web/http".to_string(),
    }];
    let d = run(&snapshot);
    let services: Vec<_> = d.checks.iter().map(|c| (c.service_id.as_str(), c.port)).collect();
    assert_eq!(
        services,
        vec![("mesos-dns:agent2:web.1:80", 80), ("mesos-dns:agent2:web.1:443", 443)]
    );
    assert!(d.checks.iter().all(|c| c.key() == "healthchecks/web/http"));
}

#[test]
fn test_identical_cycles_are_idempotent() {
    let snapshot = cluster();
    let mut store = GenerationStore::new();

    store.begin_cycle(&run(&snapshot), Vec::new());
    let first: usize = store
        .iter_mut()
        .map(|(_, b)| {
            let n = b.service_additions().len();
            b.promote();
            n
        })
        .sum();
    assert_eq!(first, 10);

    store.begin_cycle(&run(&snapshot), Vec::new());
    for (_, buckets) in store.iter_mut() {
        assert!(buckets.service_additions().is_empty());
        assert!(buckets.service_removals().is_empty());
        buckets.promote();
    }
}

#[test]
fn test_finished_task_is_removed_next_cycle() {
    let mut snapshot = cluster();
    let mut store = GenerationStore::new();
    store.begin_cycle(&run(&snapshot), Vec::new());
    store.iter_mut().for_each(|(_, b)| b.promote());

    snapshot.frameworks[0].tasks[1].state = "TASK_KILLED".to_string();
    store.begin_cycle(&run(&snapshot), Vec::new());
    let s2 = store.get("S2").unwrap();
    let removed: Vec<_> = s2.service_removals().into_iter().map(|r| r.id).collect();
    assert_eq!(removed, vec!["mesos-dns:agent2:web.2"]);
    assert!(s2.service_additions().is_empty());
}

#[test]
fn test_tag_order_does_not_affect_equality() {
    let a = ServiceRecord::new("x", "web", "10.0.0.1", 80, ["b", "a", "c"]);
    let b = ServiceRecord::new("x", "web", "10.0.0.1", 80, ["c", "b", "a"]);
    assert_eq!(a, b);
    assert!(delta(&[a], &[b]).is_empty());
}

#[test]
fn test_delta_is_directional() {
    let a = vec![
        ServiceRecord::new("1", "web", "h", 1, ["t"]),
        ServiceRecord::new("2", "web", "h", 2, ["t"]),
    ];
    let b = vec![
        ServiceRecord::new("2", "web", "h", 2, ["t"]),
        ServiceRecord::new("3", "web", "h", 3, ["t"]),
    ];
    assert_eq!(delta(&a, &b), vec![b[1].clone()]);
    assert_eq!(delta(&b, &a), vec![a[0].clone()]);
}

#[test]
fn test_purge_mode_keeps_reused_ids() {
    let check = |interval: &str| HealthCheckRecord {
        id: "web-http:svc".to_string(),
        name: "web".to_string(),
        service_id: "svc".to_string(),
        body: CheckBody {
            http: "http://10.0.0.1/".to_string(),
            interval: interval.to_string(),
            ..Default::default()
        },
    };
    let previous = vec![check("10s")];
    let current = vec![check("30s")];
    assert!(delta_checks(&current, &previous, CheckMode::Purge).is_empty());
    assert_eq!(delta_checks(&previous, &current, CheckMode::Add), current);
}

#[test]
fn test_snapshot_document_decodes() {
    let doc = r#"{
        "leader": "master@10.0.0.1:5050",
        "nodes": [{"id": "S0", "host": "10.0.0.1", "port": "5051", "hostname": "a.example", "master": true}],
        "frameworks": [{
            "id": "F0", "name": "marathon", "host": "10.0.0.1", "port": "8080", "active": true,
            "tasks": [{"id": "t1", "name": "web", "node_id": "S0", "state": "TASK_RUNNING", "ports": ["31000"]}]
        }]
    }"#;
    let snapshot: Snapshot = serde_json::from_str(doc).unwrap();
    let d = run(&snapshot);
    assert_eq!(d.nodes.len(), 1);
    assert_eq!(d.frameworks.len(), 1);
    assert_eq!(d.tasks[0].record.id, "mesos-dns:a:t1:31000");
}
