//! Maps a snapshot onto the desired service records.
//!
//! Three buckets come out of a snapshot, each keyed by the node a record
//! belongs to:
//!
//! - node records: one per node, tagged `node`, its short hostname, and
//!   `master` / `leader` where applicable;
//! - framework records: one per active framework, placed on the node that
//!   runs its scheduler;
//! - task records: one per distinct port of every running task, or a single
//!   portless record for tasks without ports.
//!
//! Records that cannot be derived are reported in [`Derived::skipped`] and the
//! rest of the snapshot is still processed.

use thiserror::Error;

use crate::address::AddressResolver;
use crate::index::NodeIndex;
use crate::model::{ServiceRecord, Snapshot, Task};
use crate::template::{check_references, CheckRequest};
use crate::util::{sanitize_name, short_hostname};

pub const NODE_TAG: &str = "node";
pub const MASTER_TAG: &str = "master";
pub const LEADER_TAG: &str = "leader";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[error("node {node_id} has invalid port {port:?}")]
    NodePort { node_id: String, port: String },
    #[error("framework {framework} has invalid port {port:?}")]
    FrameworkPort { framework: String, port: String },
    #[error("unable to find node for framework {framework}")]
    FrameworkNode { framework: String },
    #[error("task {task_id} has invalid port {port:?}")]
    TaskPort { task_id: String, port: String },
    #[error("task {task_id} runs on unknown node {node_id}")]
    TaskNode { task_id: String, node_id: String },
}

/// Naming knobs for derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriveSettings {
    /// First id segment of every record this system owns.
    pub prefix: String,
    /// Service name node records are registered under.
    pub node_service_name: String,
}

impl Default for DeriveSettings {
    fn default() -> Self {
        Self {
            prefix: "mesos-dns".into(),
            node_service_name: "mesos".into(),
        }
    }
}

/// A record together with the node whose bucket it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placed<T> {
    pub node_id: String,
    pub record: T,
}

/// Desired records for one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Derived {
    pub nodes: Vec<Placed<ServiceRecord>>,
    pub frameworks: Vec<Placed<ServiceRecord>>,
    pub tasks: Vec<Placed<ServiceRecord>>,
    /// Health-check definitions the task records reference.
    pub checks: Vec<CheckRequest>,
    pub skipped: Vec<DeriveError>,
}

impl Derived {
    /// Every derived service record regardless of bucket.
    pub fn all_services(&self) -> impl Iterator<Item = &Placed<ServiceRecord>> {
        self.nodes.iter().chain(&self.frameworks).chain(&self.tasks)
    }
}

pub fn derive(
    snapshot: &Snapshot,
    index: &NodeIndex,
    resolver: &AddressResolver,
    settings: &DeriveSettings,
) -> Derived {
    let mut out = Derived::default();
    derive_nodes(snapshot, settings, &mut out);
    derive_frameworks(snapshot, index, settings, &mut out);
    for task in snapshot.tasks().filter(|t| t.is_running()) {
        derive_task(task, index, resolver, settings, &mut out);
    }
    out
}

fn derive_nodes(snapshot: &Snapshot, settings: &DeriveSettings, out: &mut Derived) {
    let leader = snapshot.leader_host();
    for node in &snapshot.nodes {
        let Ok(port) = node.port.parse::<u16>() else {
            out.skipped.push(DeriveError::NodePort {
                node_id: node.id.clone(),
                port: node.port.clone(),
            });
            continue;
        };

        let mut tags = vec![NODE_TAG, short_hostname(&node.hostname)];
        if node.master {
            tags.push(MASTER_TAG);
        }
        if leader == Some(node.host.as_str()) {
            tags.push(LEADER_TAG);
        }

        out.nodes.push(Placed {
            node_id: node.id.clone(),
            record: ServiceRecord::new(
                format!("{}:{}", settings.prefix, node.id),
                settings.node_service_name.clone(),
                node.host.clone(),
                port,
                tags,
            ),
        });
    }
}

fn derive_frameworks(
    snapshot: &Snapshot,
    index: &NodeIndex,
    settings: &DeriveSettings,
    out: &mut Derived,
) {
    for fw in snapshot.frameworks.iter().filter(|f| f.active) {
        let Ok(port) = fw.port.parse::<u16>() else {
            out.skipped.push(DeriveError::FrameworkPort {
                framework: fw.name.clone(),
                port: fw.port.clone(),
            });
            continue;
        };
        let Some(node_id) = index.resolve(&fw.host, &fw.hostname) else {
            out.skipped.push(DeriveError::FrameworkNode {
                framework: fw.name.clone(),
            });
            continue;
        };

        out.frameworks.push(Placed {
            node_id: node_id.to_string(),
            record: ServiceRecord::new(
                format!("{}:{}", settings.prefix, fw.name),
                sanitize_name(&fw.name),
                fw.host.clone(),
                port,
                Vec::<String>::new(),
            ),
        });
    }
}

fn derive_task(
    task: &Task,
    index: &NodeIndex,
    resolver: &AddressResolver,
    settings: &DeriveSettings,
    out: &mut Derived,
) {
    let Some(short) = index.short_hostname_of(&task.node_id) else {
        out.skipped.push(DeriveError::TaskNode {
            task_id: task.id.clone(),
            node_id: task.node_id.clone(),
        });
        return;
    };
    let address = resolver.resolve(task, index);
    let name = sanitize_name(&task.name);
    let references = check_references(task);

    let ports = task.distinct_ports();
    let mut targets: Vec<(String, u16)> = Vec::with_capacity(ports.len().max(1));
    if ports.is_empty() {
        targets.push((format!("{}:{}:{}", settings.prefix, short, task.id), 0));
    }
    for raw in ports {
        match raw.parse::<u16>() {
            Ok(port) => targets.push((format!("{}:{}:{}:{}", settings.prefix, short, task.id, raw), port)),
            Err(_) => out.skipped.push(DeriveError::TaskPort {
                task_id: task.id.clone(),
                port: raw.to_string(),
            }),
        }
    }

    for (id, port) in targets {
        for reference in &references {
            out.checks.push(CheckRequest {
                node_id: task.node_id.clone(),
                service_id: id.clone(),
                address: address.clone(),
                port,
                reference: reference.clone(),
            });
        }
        out.tasks.push(Placed {
            node_id: task.node_id.clone(),
            record: ServiceRecord::new(id, name.clone(), address.clone(), port, [short]),
        });
    }
}
