//! Builtin backend: publishes the derived records as a lookup table for the
//! name-resolution server.

use std::collections::BTreeMap;

use discovery_core::address::AddressResolver;
use discovery_core::derive::{derive, DeriveSettings};
use discovery_core::index::NodeIndex;
use discovery_core::model::{ServiceRecord, Snapshot};
use discovery_core::now_ms;
use tokio::sync::watch;
use tracing::warn;

use crate::config::BuiltinConfig;

/// Every derived record keyed by fully qualified name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    pub generated_ms: i64,
    pub records: BTreeMap<String, Vec<ServiceRecord>>,
}

impl RecordTable {
    pub fn lookup(&self, name: &str) -> &[ServiceRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of records across all names.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct BuiltinEngine {
    domain: String,
    settings: DeriveSettings,
    resolver: AddressResolver,
    table: watch::Sender<RecordTable>,
}

impl BuiltinEngine {
    pub fn new(config: BuiltinConfig, resolver: AddressResolver) -> Self {
        let (table, _) = watch::channel(RecordTable::default());
        Self {
            domain: config.domain,
            settings: DeriveSettings::default(),
            resolver,
            table,
        }
    }

    /// Receives every table published from now on.
    pub fn subscribe(&self) -> watch::Receiver<RecordTable> {
        self.table.subscribe()
    }

    /// Rebuilds the table from the snapshot and publishes it. Returns the
    /// number of records published.
    pub fn reconcile(&mut self, snapshot: &Snapshot) -> usize {
        let index = NodeIndex::build(snapshot);
        let derived = derive(snapshot, &index, &self.resolver, &self.settings);
        for skipped in &derived.skipped {
            warn!(error = %skipped, "skipping record");
        }

        let mut records: BTreeMap<String, Vec<ServiceRecord>> = BTreeMap::new();
        for placed in derived.all_services() {
            let name = format!("{}.{}", placed.record.name, self.domain);
            records.entry(name).or_default().push(placed.record.clone());
        }
        let table = RecordTable {
            generated_ms: now_ms(),
            records,
        };
        let published = table.len();
        self.table.send_replace(table);
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::model::{Framework, Node, Task, TASK_RUNNING};

    fn snapshot() -> Snapshot {
        Snapshot {
            leader: "master@10.0.0.1:5050".into(),
            nodes: vec![Node {
                id: "S0".into(),
                host: "10.0.0.1".into(),
                port: "5051".into(),
                hostname: "a.example".into(),
                master: true,
            }],
            frameworks: vec![Framework {
                id: "F0".into(),
                name: "marathon".into(),
                host: "10.0.0.1".into(),
                port: "8080".into(),
                hostname: "a.example".into(),
                active: true,
                tasks: ["80", "443"]
                    .iter()
                    .enumerate()
                    .map(|(i, port)| Task {
                        id: format!("web.{i}"),
                        name: "web".into(),
                        node_id: "S0".into(),
                        state: TASK_RUNNING.into(),
                        ports: vec![port.to_string()],
                        ..Default::default()
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn publishes_table_to_subscribers() {
        let mut engine = BuiltinEngine::new(BuiltinConfig::default(), AddressResolver::default());
        let rx = engine.subscribe();
        assert_eq!(engine.reconcile(&snapshot()), 4);

        let table = rx.borrow();
        assert!(table.generated_ms > 0);
        assert_eq!(table.lookup("mesos.mesos").len(), 1);
        assert_eq!(table.lookup("marathon.mesos").len(), 1);
        let ports: Vec<u16> = table.lookup("web.mesos").iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![80, 443]);
        assert!(table.lookup("nothing.mesos").is_empty());
    }
}
