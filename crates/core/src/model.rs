use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Task state that makes a task eligible for derivation.
pub const TASK_RUNNING: &str = "TASK_RUNNING";

/// Immutable, point-in-time view of cluster topology for one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Leading master pid, e.g. `master@10.10.10.8:5050`.
    #[serde(default)]
    pub leader: String,
    /// Worker nodes.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Registered frameworks together with their tasks.
    #[serde(default)]
    pub frameworks: Vec<Framework>,
}

impl Snapshot {
    /// Host part of the leader pid (`name@host:port` -> `host`).
    pub fn leader_host(&self) -> Option<&str> {
        let (_, addr) = self.leader.split_once('@')?;
        let host = addr.split(':').next().unwrap_or(addr);
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }

    /// Iterates over every task of every framework.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.frameworks.iter().flat_map(|f| f.tasks.iter())
    }
}

/// A worker machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    /// Opaque node id.
    pub id: String,
    /// Address the node's agent process listens on.
    pub host: String,
    /// Agent port, kept as reported so that garbage can be skipped per node.
    pub port: String,
    /// Fully qualified hostname.
    pub hostname: String,
    /// Whether the node also runs a master.
    #[serde(default)]
    pub master: bool,
}

/// A scheduler registered with the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Framework {
    pub id: String,
    pub name: String,
    /// Host part of the framework's pid.
    pub host: String,
    /// Port part of the framework's pid.
    pub port: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A key/value label attached to a task or a status update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// One status update of a task. Only labels are of interest here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// A unit of work scheduled onto a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub node_id: String,
    pub state: String,
    /// Ports as reported; entries that do not parse are skipped at derivation.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Address per source (`netinfo`, `mesos`, `docker`, `host`, ...).
    #[serde(default)]
    pub addresses: BTreeMap<String, String>,
    /// Status updates, most recent first.
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
}

impl Task {
    pub fn is_running(&self) -> bool {
        self.state == TASK_RUNNING
    }

    /// Values of every label with the given key, in declaration order.
    pub fn label_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.labels
            .iter()
            .filter(move |l| l.key == key)
            .map(|l| l.value.as_str())
    }

    /// Ports in declaration order with duplicates removed.
    pub fn distinct_ports(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.ports
            .iter()
            .map(String::as_str)
            .filter(|p| seen.insert(*p))
            .collect()
    }
}

/// A service entry destined for the catalog.
///
/// Serializes to the catalog's registration payload. Equality compares every
/// field; tags are a set, so ordering never matters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    /// 0 means "no port".
    #[serde(rename = "Port", default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(rename = "Tags", default)]
    pub tags: BTreeSet<String>,
}

impl ServiceRecord {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>, port: u16, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// How a health check probes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Http,
    Tcp,
    Script,
}

/// Probe definition of a health check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckBody {
    #[serde(rename = "HTTP", default, skip_serializing_if = "String::is_empty")]
    pub http: String,
    #[serde(rename = "TCP", default, skip_serializing_if = "String::is_empty")]
    pub tcp: String,
    #[serde(rename = "Script", default, skip_serializing_if = "String::is_empty")]
    pub script: String,
    #[serde(rename = "Interval", default, skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(rename = "Timeout", default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(rename = "Notes", default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    /// Initial status reported before the first probe.
    #[serde(rename = "Status", default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

/// A health check attached to one service record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckRecord {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(flatten)]
    pub body: CheckBody,
}

impl HealthCheckRecord {
    pub fn check_type(&self) -> CheckType {
        if !self.body.http.is_empty() {
            CheckType::Http
        } else if !self.body.tcp.is_empty() {
            CheckType::Tcp
        } else {
            CheckType::Script
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_host_parses_pid() {
        let snap = Snapshot {
            leader: "master@10.10.10.8:5050".into(),
            ..Default::default()
        };
        assert_eq!(snap.leader_host(), Some("10.10.10.8"));

        let snap = Snapshot {
            leader: "10.10.10.8:5050".into(),
            ..Default::default()
        };
        assert_eq!(snap.leader_host(), None);
    }

    #[test]
    fn service_record_wire_shape() {
        let rec = ServiceRecord::new("p:a:1", "web", "10.0.0.1", 0, ["b", "a"]);
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["ID"], "p:a:1");
        assert!(v.get("Port").is_none());
        assert_eq!(v["Tags"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn check_type_follows_body() {
        let mut check = HealthCheckRecord::default();
        assert_eq!(check.check_type(), CheckType::Script);
        check.body.tcp = "10.0.0.1:80".into();
        assert_eq!(check.check_type(), CheckType::Tcp);
        check.body.http = "http://10.0.0.1/".into();
        assert_eq!(check.check_type(), CheckType::Http);
    }

    #[test]
    fn distinct_ports_keeps_first_occurrence() {
        let task = Task {
            ports: vec!["80".into(), "443".into(), "80".into()],
            ..Default::default()
        };
        assert_eq!(task.distinct_ports(), vec!["80", "443"]);
    }
}
