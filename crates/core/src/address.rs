//! Picks the address a task's service records advertise.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::index::NodeIndex;
use crate::model::Task;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressSourceError {
    #[error("empty address source list")]
    Empty,
    #[error("duplicate address source: {0}")]
    Duplicate(String),
    #[error("invalid address source {0:?}")]
    Invalid(String),
    #[error("label address source must look like `label:<name>` (found {0:?})")]
    MissingLabel(String),
}

/// One entry of the address preference list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressSource {
    /// Container network info reported by the node.
    NetInfo,
    /// Sandbox network address.
    Mesos,
    Docker,
    Host,
    /// First value of the named label across the task's status updates.
    Label(String),
}

impl FromStr for AddressSource {
    type Err = AddressSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = match s.split_once(':') {
            Some((k, r)) => (k, Some(r)),
            None => (s, None),
        };
        match (kind, rest) {
            ("netinfo", None) => Ok(Self::NetInfo),
            ("mesos", None) => Ok(Self::Mesos),
            ("docker", None) => Ok(Self::Docker),
            ("host", None) => Ok(Self::Host),
            ("label", Some(name)) if !name.is_empty() && !name.contains(':') => {
                Ok(Self::Label(name.to_string()))
            }
            ("label", _) => Err(AddressSourceError::MissingLabel(s.to_string())),
            _ => Err(AddressSourceError::Invalid(s.to_string())),
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetInfo => f.write_str("netinfo"),
            Self::Mesos => f.write_str("mesos"),
            Self::Docker => f.write_str("docker"),
            Self::Host => f.write_str("host"),
            Self::Label(name) => write!(f, "label:{name}"),
        }
    }
}

impl AddressSource {
    fn lookup(&self, task: &Task) -> Option<String> {
        let found = match self {
            Self::Label(name) => task
                .statuses
                .iter()
                .flat_map(|s| s.labels.iter())
                .filter(|l| &l.key == name)
                .map(|l| l.value.clone())
                .next(),
            other => task.addresses.get(&other.to_string()).cloned(),
        };
        found.filter(|a| !a.is_empty())
    }
}

/// Ordered address preference policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressResolver {
    sources: Vec<AddressSource>,
}

impl AddressResolver {
    pub fn new(sources: Vec<AddressSource>) -> Self {
        Self { sources }
    }

    /// Parses and validates a preference list such as `["docker", "host"]`.
    pub fn parse<S: AsRef<str>>(sources: &[S]) -> Result<Self, AddressSourceError> {
        if sources.is_empty() {
            return Err(AddressSourceError::Empty);
        }
        let mut seen = HashSet::new();
        let mut parsed = Vec::with_capacity(sources.len());
        for raw in sources {
            let raw = raw.as_ref();
            if !seen.insert(raw) {
                return Err(AddressSourceError::Duplicate(raw.to_string()));
            }
            parsed.push(raw.parse()?);
        }
        Ok(Self::new(parsed))
    }

    pub fn sources(&self) -> &[AddressSource] {
        &self.sources
    }

    /// First non-empty address in preference order, else the host address of
    /// the task's node (empty when the node is unknown).
    pub fn resolve(&self, task: &Task, nodes: &NodeIndex) -> String {
        self.sources
            .iter()
            .find_map(|src| src.lookup(task))
            .or_else(|| nodes.host_of(&task.node_id).map(str::to_string))
            .unwrap_or_default()
    }
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(vec![AddressSource::NetInfo, AddressSource::Mesos, AddressSource::Host])
    }
}
