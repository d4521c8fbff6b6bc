use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use discovery_core::model::{HealthCheckRecord, ServiceRecord};

use crate::agent::{AgentError, CatalogAgent, CatalogClient, DeregisterTarget, Member};

/// In-memory catalog for tests and dry runs. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    members: Vec<Member>,
    members_down: bool,
    catalog_down: bool,
    agents: HashMap<String, AgentState>,
    kv: HashMap<String, Vec<u8>>,
    catalog_deregistrations: Vec<(String, DeregisterTarget)>,
    connects: usize,
}

#[derive(Debug, Default)]
struct AgentState {
    services: BTreeMap<String, ServiceRecord>,
    checks: BTreeMap<String, HealthCheckRecord>,
    down: bool,
    reject_deregister: bool,
    reject_register: BTreeSet<String>,
    listings: usize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_member(&self, name: &str, addr: &str) {
        let mut inner = self.lock();
        inner.members.push(Member {
            name: name.to_string(),
            addr: addr.to_string(),
        });
        inner.agents.entry(addr.to_string()).or_default();
    }

    /// Drops the member from the listing; its agent state stays behind.
    pub fn remove_member(&self, addr: &str) {
        self.lock().members.retain(|m| m.addr != addr);
    }

    pub fn set_members_down(&self, down: bool) {
        self.lock().members_down = down;
    }

    pub fn set_catalog_down(&self, down: bool) {
        self.lock().catalog_down = down;
    }

    /// An agent that is down fails every call, including the liveness probe.
    pub fn set_agent_down(&self, addr: &str, down: bool) {
        self.lock().agents.entry(addr.to_string()).or_default().down = down;
    }

    /// Agent-level deregistrations fail while the agent otherwise works.
    pub fn reject_deregister(&self, addr: &str, reject: bool) {
        self.lock().agents.entry(addr.to_string()).or_default().reject_deregister = reject;
    }

    pub fn reject_register(&self, addr: &str, service_id: &str) {
        self.lock()
            .agents
            .entry(addr.to_string())
            .or_default()
            .reject_register
            .insert(service_id.to_string());
    }

    pub fn put_key(&self, path: &str, value: impl Into<Vec<u8>>) {
        self.lock().kv.insert(path.to_string(), value.into());
    }

    /// Registers a service behind the engine's back.
    pub fn insert_service(&self, addr: &str, record: ServiceRecord) {
        self.lock()
            .agents
            .entry(addr.to_string())
            .or_default()
            .services
            .insert(record.id.clone(), record);
    }

    pub fn services(&self, addr: &str) -> Vec<ServiceRecord> {
        self.lock()
            .agents
            .get(addr)
            .map(|a| a.services.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn service_ids(&self, addr: &str) -> Vec<String> {
        self.services(addr).into_iter().map(|s| s.id).collect()
    }

    pub fn checks(&self, addr: &str) -> Vec<HealthCheckRecord> {
        self.lock()
            .agents
            .get(addr)
            .map(|a| a.checks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn catalog_deregistrations(&self) -> Vec<(String, DeregisterTarget)> {
        self.lock().catalog_deregistrations.clone()
    }

    pub fn listings(&self, addr: &str) -> usize {
        self.lock().agents.get(addr).map_or(0, |a| a.listings)
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn members(&self) -> Result<Vec<Member>, AgentError> {
        let inner = self.lock();
        if inner.members_down {
            return Err(AgentError::Unavailable("members".into()));
        }
        Ok(inner.members.clone())
    }

    async fn connect(&self, member: &Member) -> Result<Arc<dyn CatalogAgent>, AgentError> {
        self.lock().connects += 1;
        Ok(Arc::new(InMemoryAgent {
            addr: member.addr.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn catalog_deregister(&self, node: &str, target: &DeregisterTarget) -> Result<(), AgentError> {
        let mut inner = self.lock();
        if inner.catalog_down {
            return Err(AgentError::Unavailable("catalog".into()));
        }
        inner.catalog_deregistrations.push((node.to_string(), target.clone()));
        let Some(addr) = inner.members.iter().find(|m| m.name == node).map(|m| m.addr.clone()) else {
            return Ok(());
        };
        if let Some(agent) = inner.agents.get_mut(&addr) {
            match target {
                DeregisterTarget::Service(id) => {
                    agent.services.remove(id);
                }
                DeregisterTarget::Check(id) => {
                    agent.checks.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn get_key(&self, path: &str) -> Result<Option<Vec<u8>>, AgentError> {
        Ok(self.lock().kv.get(path).cloned())
    }
}

#[derive(Debug)]
struct InMemoryAgent {
    addr: String,
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryAgent {
    fn with_agent<T>(&self, f: impl FnOnce(&mut AgentState) -> Result<T, AgentError>) -> Result<T, AgentError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let agent = inner.agents.entry(self.addr.clone()).or_default();
        if agent.down {
            return Err(AgentError::Unavailable(self.addr.clone()));
        }
        f(agent)
    }
}

#[async_trait]
impl CatalogAgent for InMemoryAgent {
    async fn self_check(&self) -> Result<(), AgentError> {
        self.with_agent(|_| Ok(()))
    }

    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AgentError> {
        self.with_agent(|a| {
            if a.reject_register.contains(&record.id) {
                return Err(AgentError::Unavailable(format!("register {}", record.id)));
            }
            a.services.insert(record.id.clone(), record.clone());
            Ok(())
        })
    }

    async fn deregister_service(&self, id: &str) -> Result<(), AgentError> {
        self.with_agent(|a| {
            if a.reject_deregister {
                return Err(AgentError::Unavailable(format!("deregister {id}")));
            }
            a.services.remove(id);
            Ok(())
        })
    }

    async fn register_check(&self, check: &HealthCheckRecord) -> Result<(), AgentError> {
        self.with_agent(|a| {
            a.checks.insert(check.id.clone(), check.clone());
            Ok(())
        })
    }

    async fn deregister_check(&self, id: &str) -> Result<(), AgentError> {
        self.with_agent(|a| {
            if a.reject_deregister {
                return Err(AgentError::Unavailable(format!("deregister {id}")));
            }
            a.checks.remove(id);
            Ok(())
        })
    }

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, AgentError> {
        self.with_agent(|a| {
            a.listings += 1;
            Ok(a.services.values().cloned().collect())
        })
    }
}
