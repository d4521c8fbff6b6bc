//! Catalog backend: keeps every node's agent in step with the cluster.
//!
//! One cycle derives the desired records, renders their health checks,
//! validates agent connections, loads the generation store and then runs one
//! [`NodeUnit`] per reachable node concurrently. Nodes whose agent cannot be
//! reached keep their previous generation until a later cycle reaches them.

use std::collections::HashMap;
use std::sync::Arc;

use discovery_core::address::AddressResolver;
use discovery_core::derive::{derive, DeriveSettings};
use discovery_core::generation::GenerationStore;
use discovery_core::index::NodeIndex;
use discovery_core::model::{HealthCheckRecord, Snapshot};
use discovery_core::refresh::RefreshCounter;
use discovery_core::template::{render_check, CheckRequest};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::agent::{AgentError, CatalogAgent, CatalogClient, Member};
use crate::apply::{NodeReport, NodeUnit};
use crate::config::CatalogConfig;

/// The node id outlives the handle so a node that left the snapshot can still
/// be cleaned once its agent answers again.
struct CachedAgent {
    node_id: String,
    agent: Option<Arc<dyn CatalogAgent>>,
}

struct LiveAgent {
    node_name: String,
    agent: Arc<dyn CatalogAgent>,
}

/// Outcome of one catalog cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether this cycle listed agents for drift.
    pub drift: bool,
    /// One entry per reachable node, ordered by node id.
    pub nodes: Vec<NodeReport>,
    /// Nodes with records but no live agent.
    pub unreachable: Vec<String>,
    pub skipped_records: usize,
    pub checks_dropped: usize,
}

impl CycleReport {
    pub fn services_added(&self) -> usize {
        self.nodes.iter().map(|n| n.services_added).sum()
    }

    pub fn services_removed(&self) -> usize {
        self.nodes.iter().map(|n| n.services_removed).sum()
    }

    pub fn failures(&self) -> usize {
        self.nodes.iter().map(|n| n.failures).sum()
    }
}

pub struct CatalogEngine {
    client: Arc<dyn CatalogClient>,
    config: CatalogConfig,
    settings: DeriveSettings,
    resolver: AddressResolver,
    /// Keyed by member address.
    agents: HashMap<String, CachedAgent>,
    store: GenerationStore,
    refresh: RefreshCounter,
}

impl CatalogEngine {
    pub fn new(client: Arc<dyn CatalogClient>, config: CatalogConfig, resolver: AddressResolver) -> Self {
        Self {
            client,
            settings: config.derive_settings(),
            refresh: RefreshCounter::new(config.cache_refresh, !config.cache_only),
            config,
            resolver,
            agents: HashMap::new(),
            store: GenerationStore::new(),
        }
    }

    pub fn store(&self) -> &GenerationStore {
        &self.store
    }

    /// Runs one cycle. Fails only when the member list cannot be fetched, in
    /// which case no bucket is touched.
    pub async fn reconcile(&mut self, snapshot: &Snapshot) -> Result<CycleReport, AgentError> {
        let drift = self.refresh.tick();
        let members = self.client.members().await?;

        let index = NodeIndex::build(snapshot);
        let derived = derive(snapshot, &index, &self.resolver, &self.settings);
        for skipped in &derived.skipped {
            warn!(error = %skipped, "skipping record");
        }
        let (checks, checks_dropped) = self.render_checks(&derived.checks).await;
        let live = self.connect_agents(&members, &index).await;

        // A node gone from both the snapshot and the member list has no agent
        // left to clean.
        let agents = &self.agents;
        self.store.retain(|node_id| {
            index.host_of(node_id).is_some() || agents.values().any(|c| c.node_id == node_id)
        });
        self.store.begin_cycle(&derived, checks);
        for node_id in live.keys() {
            self.store.entry(node_id);
        }

        let mut report = CycleReport {
            drift,
            skipped_records: derived.skipped.len(),
            checks_dropped,
            ..Default::default()
        };
        let max_concurrent = self.config.max_concurrent_nodes;
        let mut units = Vec::new();
        for (node_id, buckets) in self.store.iter_mut() {
            let Some(target) = live.get(node_id.as_str()) else {
                report.unreachable.push(node_id.clone());
                continue;
            };
            let unit = NodeUnit {
                node_id: node_id.clone(),
                node_name: target.node_name.clone(),
                agent: Arc::clone(&target.agent),
                client: Arc::clone(&self.client),
                prefix: self.settings.prefix.clone(),
                drift,
            };
            units.push(unit.apply(buckets));
        }

        let limit = match max_concurrent {
            0 => units.len().max(1),
            n => n,
        };
        report.nodes = stream::iter(units).buffer_unordered(limit).collect().await;
        report.nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        self.store.prune();
        Ok(report)
    }

    /// Fetches each referenced definition once and renders it per service.
    async fn render_checks(&self, requests: &[CheckRequest]) -> (Vec<(String, HealthCheckRecord)>, usize) {
        let mut definitions: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        let mut rendered = Vec::new();
        let mut dropped = 0;

        for req in requests {
            let key = req.key();
            if !definitions.contains_key(&key) {
                let fetched = match self.client.get_key(&key).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(%key, error = %e, "failed to fetch health check definition");
                        None
                    }
                };
                definitions.insert(key.clone(), fetched);
            }
            let Some(Some(definition)) = definitions.get(&key) else {
                debug!(%key, service_id = %req.service_id, "health check definition missing");
                dropped += 1;
                continue;
            };
            match render_check(definition, req) {
                Ok(check) => rendered.push((req.node_id.clone(), check)),
                Err(e) => {
                    warn!(service_id = %req.service_id, error = %e, "dropping health check");
                    dropped += 1;
                }
            }
        }
        (rendered, dropped)
    }

    /// Live agents keyed by node id. Cached handles are re-probed; members
    /// that fail the probe are left out of this cycle but stay cached.
    async fn connect_agents(&mut self, members: &[Member], index: &NodeIndex) -> HashMap<String, LiveAgent> {
        let mut live = HashMap::new();
        for member in members {
            let node_id = index
                .resolve(&member.addr, &member.name)
                .map(str::to_string)
                .or_else(|| self.agents.get(&member.addr).map(|c| c.node_id.clone()));
            let Some(node_id) = node_id else {
                debug!(member = %member.name, addr = %member.addr, "member is not a known node");
                continue;
            };
            let agent = self.validated_agent(member).await;
            self.agents.insert(
                member.addr.clone(),
                CachedAgent {
                    node_id: node_id.clone(),
                    agent: agent.clone(),
                },
            );
            let Some(agent) = agent else {
                continue;
            };

            let node_name = index
                .short_hostname_of(&node_id)
                .map(str::to_string)
                .unwrap_or_else(|| member.name.clone());
            live.insert(node_id, LiveAgent { node_name, agent });
        }
        self.agents.retain(|addr, _| members.iter().any(|m| &m.addr == addr));
        live
    }

    async fn validated_agent(&self, member: &Member) -> Option<Arc<dyn CatalogAgent>> {
        if let Some(cached) = self.agents.get(&member.addr).and_then(|c| c.agent.clone()) {
            match cached.self_check().await {
                Ok(()) => return Some(cached),
                Err(e) => debug!(member = %member.name, error = %e, "cached agent failed probe; reconnecting"),
            }
        }

        let agent = match self.client.connect(member).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!(member = %member.name, error = %e, "failed to connect to agent");
                return None;
            }
        };
        if let Err(e) = agent.self_check().await {
            warn!(member = %member.name, error = %e, "agent unreachable");
            return None;
        }
        Some(agent)
    }
}
