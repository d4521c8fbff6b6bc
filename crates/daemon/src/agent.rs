//! Seams between the catalog engine and the service catalog it drives.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use discovery_core::model::{HealthCheckRecord, ServiceRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("invalid catalog url {url:?}: {reason}")]
    Url { url: String, reason: String },
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// A cluster member as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Node name the member registered with, usually its hostname.
    pub name: String,
    /// Address the member's agent is reachable on.
    pub addr: String,
}

/// What a catalog-level deregistration removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeregisterTarget {
    Service(String),
    Check(String),
}

impl fmt::Display for DeregisterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(id) => write!(f, "service {id}"),
            Self::Check(id) => write!(f, "check {id}"),
        }
    }
}

/// The agent running on one node.
#[async_trait]
pub trait CatalogAgent: Send + Sync {
    /// Cheap liveness probe used to validate cached connections.
    async fn self_check(&self) -> Result<(), AgentError>;

    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AgentError>;
    async fn deregister_service(&self, id: &str) -> Result<(), AgentError>;

    async fn register_check(&self, check: &HealthCheckRecord) -> Result<(), AgentError>;
    async fn deregister_check(&self, id: &str) -> Result<(), AgentError>;

    /// Every service the agent currently holds, whoever registered it.
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, AgentError>;
}

/// Cluster-wide catalog operations.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn members(&self) -> Result<Vec<Member>, AgentError>;

    /// Opens a handle to the member's agent. Does not probe it.
    async fn connect(&self, member: &Member) -> Result<Arc<dyn CatalogAgent>, AgentError>;

    /// Removes an entry from the catalog directly, bypassing the node's agent.
    async fn catalog_deregister(&self, node: &str, target: &DeregisterTarget) -> Result<(), AgentError>;

    /// Raw value stored under `path`; `None` when the key does not exist.
    async fn get_key(&self, path: &str) -> Result<Option<Vec<u8>>, AgentError>;
}
