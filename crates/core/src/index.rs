use std::collections::HashMap;

use crate::model::Snapshot;
use crate::util::short_hostname;

/// Node identity lookups rebuilt from every snapshot.
///
/// Where two nodes share a host or short hostname the one listed first in the
/// snapshot wins.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    id_host: HashMap<String, String>,
    host_id: HashMap<String, String>,
    id_short: HashMap<String, String>,
    short_id: HashMap<String, String>,
}

impl NodeIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut index = Self::default();
        for node in &snapshot.nodes {
            let short = short_hostname(&node.hostname).to_string();
            index.id_host.entry(node.id.clone()).or_insert_with(|| node.host.clone());
            index.host_id.entry(node.host.clone()).or_insert_with(|| node.id.clone());
            index.id_short.entry(node.id.clone()).or_insert_with(|| short.clone());
            index.short_id.entry(short).or_insert_with(|| node.id.clone());
        }
        index
    }

    pub fn host_of(&self, node_id: &str) -> Option<&str> {
        self.id_host.get(node_id).map(String::as_str)
    }

    pub fn short_hostname_of(&self, node_id: &str) -> Option<&str> {
        self.id_short.get(node_id).map(String::as_str)
    }

    pub fn id_for_host(&self, host: &str) -> Option<&str> {
        self.host_id.get(host).map(String::as_str)
    }

    pub fn id_for_short_hostname(&self, short: &str) -> Option<&str> {
        self.short_id.get(short).map(String::as_str)
    }

    /// Resolves a node by address first, then by hostname.
    pub fn resolve(&self, host: &str, hostname: &str) -> Option<&str> {
        self.id_for_host(host)
            .or_else(|| self.id_for_short_hostname(short_hostname(hostname)))
    }

    pub fn len(&self) -> usize {
        self.id_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_host.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn node(id: &str, host: &str, hostname: &str) -> Node {
        Node {
            id: id.into(),
            host: host.into(),
            port: "5051".into(),
            hostname: hostname.into(),
            master: false,
        }
    }

    #[test]
    fn lookups_in_both_directions() {
        let snap = Snapshot {
            nodes: vec![node("S0", "10.0.0.1", "a.example"), node("S1", "10.0.0.2", "b.example")],
            ..Default::default()
        };
        let idx = NodeIndex::build(&snap);
        assert_eq!(idx.host_of("S1"), Some("10.0.0.2"));
        assert_eq!(idx.id_for_host("10.0.0.1"), Some("S0"));
        assert_eq!(idx.short_hostname_of("S0"), Some("a"));
        assert_eq!(idx.id_for_short_hostname("b"), Some("S1"));
        assert_eq!(idx.resolve("10.9.9.9", "b.other"), Some("S1"));
        assert_eq!(idx.resolve("10.9.9.9", "zzz"), None);
    }

    #[test]
    fn first_node_wins_on_shared_hostname() {
        let snap = Snapshot {
            nodes: vec![node("S0", "10.0.0.1", "dup.a"), node("S1", "10.0.0.2", "dup.b")],
            ..Default::default()
        };
        let idx = NodeIndex::build(&snap);
        assert_eq!(idx.id_for_short_hostname("dup"), Some("S0"));
    }
}
