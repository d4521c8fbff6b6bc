//! Two-generation record buckets.
//!
//! Every bucket moves `Empty -> Populated -> Reconciled` once per cycle:
//! derivation fills `current`, the apply step diffs it against `previous`, and
//! promotion makes `current` the new `previous`. Buckets of nodes that were not
//! reached keep their `previous` untouched, so the next reachable cycle still
//! diffs against what was last applied.

use std::collections::BTreeMap;

use crate::derive::Derived;
use crate::diff::{delta, delta_checks, CheckMode};
use crate::model::{HealthCheckRecord, ServiceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Empty,
    Populated,
    Reconciled,
}

#[derive(Debug, Clone)]
pub struct Bucket<T> {
    current: Vec<T>,
    previous: Vec<T>,
    phase: Phase,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self {
            current: Vec::new(),
            previous: Vec::new(),
            phase: Phase::Empty,
        }
    }
}

impl<T: Clone + PartialEq> Bucket<T> {
    /// Drops whatever a previous, unapplied derivation left in `current`.
    pub fn reset(&mut self) {
        self.current.clear();
        self.phase = Phase::Empty;
    }

    pub fn push(&mut self, record: T) {
        self.current.push(record);
        self.phase = Phase::Populated;
    }

    pub fn current(&self) -> &[T] {
        &self.current
    }

    pub fn previous(&self) -> &[T] {
        &self.previous
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn additions(&self) -> Vec<T> {
        delta(&self.previous, &self.current)
    }

    pub fn removals(&self) -> Vec<T> {
        delta(&self.current, &self.previous)
    }

    pub fn promote(&mut self) {
        self.previous = std::mem::take(&mut self.current);
        self.phase = Phase::Reconciled;
    }

    /// Seeds `previous` directly; used when adopting records applied earlier.
    pub fn set_previous(&mut self, records: Vec<T>) {
        self.previous = records;
    }

    fn is_vacant(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }
}

/// Service bucket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Node,
    Framework,
    Task,
}

/// All buckets owned by one node.
#[derive(Debug, Clone, Default)]
pub struct NodeBuckets {
    pub nodes: Bucket<ServiceRecord>,
    pub frameworks: Bucket<ServiceRecord>,
    pub tasks: Bucket<ServiceRecord>,
    pub checks: Bucket<HealthCheckRecord>,
}

impl NodeBuckets {
    pub fn services(&self, kind: RecordKind) -> &Bucket<ServiceRecord> {
        match kind {
            RecordKind::Node => &self.nodes,
            RecordKind::Framework => &self.frameworks,
            RecordKind::Task => &self.tasks,
        }
    }

    pub fn services_mut(&mut self, kind: RecordKind) -> &mut Bucket<ServiceRecord> {
        match kind {
            RecordKind::Node => &mut self.nodes,
            RecordKind::Framework => &mut self.frameworks,
            RecordKind::Task => &mut self.tasks,
        }
    }

    fn service_buckets(&self) -> [&Bucket<ServiceRecord>; 3] {
        [&self.nodes, &self.frameworks, &self.tasks]
    }

    pub fn reset(&mut self) {
        self.nodes.reset();
        self.frameworks.reset();
        self.tasks.reset();
        self.checks.reset();
    }

    pub fn service_additions(&self) -> Vec<ServiceRecord> {
        self.service_buckets().iter().flat_map(|b| b.additions()).collect()
    }

    pub fn service_removals(&self) -> Vec<ServiceRecord> {
        self.service_buckets().iter().flat_map(|b| b.removals()).collect()
    }

    pub fn check_additions(&self) -> Vec<HealthCheckRecord> {
        delta_checks(self.checks.previous(), self.checks.current(), CheckMode::Add)
    }

    pub fn check_removals(&self) -> Vec<HealthCheckRecord> {
        delta_checks(self.checks.current(), self.checks.previous(), CheckMode::Purge)
    }

    /// Every service record of the generation being built.
    pub fn current_services(&self) -> Vec<ServiceRecord> {
        self.service_buckets()
            .iter()
            .flat_map(|b| b.current().iter().cloned())
            .collect()
    }

    pub fn promote(&mut self) {
        self.nodes.promote();
        self.frameworks.promote();
        self.tasks.promote();
        self.checks.promote();
    }

    fn is_vacant(&self) -> bool {
        self.service_buckets().iter().all(|b| b.is_vacant()) && self.checks.is_vacant()
    }
}

/// Process-lifetime bucket state keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct GenerationStore {
    nodes: BTreeMap<String, NodeBuckets>,
}

impl GenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a cycle: clears `current` everywhere and loads the derived records.
    pub fn begin_cycle(&mut self, derived: &Derived, checks: Vec<(String, HealthCheckRecord)>) {
        for buckets in self.nodes.values_mut() {
            buckets.reset();
        }
        for (kind, placed) in [
            (RecordKind::Node, &derived.nodes),
            (RecordKind::Framework, &derived.frameworks),
            (RecordKind::Task, &derived.tasks),
        ] {
            for p in placed {
                self.entry(&p.node_id).services_mut(kind).push(p.record.clone());
            }
        }
        for (node_id, check) in checks {
            self.entry(&node_id).checks.push(check);
        }
    }

    pub fn entry(&mut self, node_id: &str) -> &mut NodeBuckets {
        self.nodes.entry(node_id.to_string()).or_default()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeBuckets> {
        self.nodes.get(node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut NodeBuckets)> {
        self.nodes.iter_mut()
    }

    /// Keeps only the nodes `keep` accepts, whatever their buckets hold.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.nodes.retain(|node_id, _| keep(node_id));
    }

    /// Forgets nodes with nothing applied and nothing pending.
    pub fn prune(&mut self) {
        self.nodes.retain(|_, b| !b.is_vacant());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckBody;

    fn svc(id: &str) -> ServiceRecord {
        ServiceRecord::new(id, "web", "10.0.0.1", 80, ["a"])
    }

    fn check(id: &str, http: &str) -> HealthCheckRecord {
        HealthCheckRecord {
            id: id.into(),
            name: "c".into(),
            service_id: "svc".into(),
            body: CheckBody {
                http: http.into(),
                interval: "10s".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn bucket_phases() {
        let mut b = Bucket::default();
        assert_eq!(b.phase(), Phase::Empty);
        b.push(svc("a"));
        assert_eq!(b.phase(), Phase::Populated);
        assert_eq!(b.additions(), vec![svc("a")]);
        b.promote();
        assert_eq!(b.phase(), Phase::Reconciled);
        assert!(b.current().is_empty());
        assert_eq!(b.previous(), &[svc("a")]);
        b.reset();
        assert_eq!(b.removals(), vec![svc("a")]);
    }

    #[test]
    fn updated_check_is_added_but_not_purged() {
        let mut nb = NodeBuckets::default();
        nb.checks.set_previous(vec![check("c1", "http://old")]);
        nb.checks.push(check("c1", "http://new"));
        assert_eq!(nb.check_additions(), vec![check("c1", "http://new")]);
        assert!(nb.check_removals().is_empty());
    }

    #[test]
    fn prune_drops_vacant_nodes() {
        let mut store = GenerationStore::new();
        store.entry("S0");
        store.entry("S1").tasks.push(svc("a"));
        store.prune();
        assert_eq!(store.node_ids().collect::<Vec<_>>(), vec!["S1"]);
    }

    #[test]
    fn retain_drops_rejected_nodes_with_history() {
        let mut store = GenerationStore::new();
        store.entry("S0").tasks.push(svc("a"));
        store.entry("S1").tasks.push(svc("b"));
        store.entry("S1").promote();
        store.retain(|id| id == "S0");
        assert_eq!(store.node_ids().collect::<Vec<_>>(), vec!["S0"]);
    }
}
