//! Pushes one node's generation delta to its agent.

use std::collections::HashSet;
use std::sync::Arc;

use discovery_core::generation::NodeBuckets;
use discovery_core::model::ServiceRecord;
use tracing::{debug, warn};

use crate::agent::{CatalogAgent, CatalogClient, DeregisterTarget};

/// Everything a node's unit of work needs besides its buckets.
pub struct NodeUnit {
    pub node_id: String,
    /// Catalog node name used for fallback deregistration.
    pub node_name: String,
    pub agent: Arc<dyn CatalogAgent>,
    pub client: Arc<dyn CatalogClient>,
    /// Only listed services with this first id segment are ours.
    pub prefix: String,
    /// List the agent and reconcile against what it actually holds.
    pub drift: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReport {
    pub node_id: String,
    pub services_added: usize,
    pub services_removed: usize,
    pub checks_added: usize,
    pub checks_removed: usize,
    /// Owned services found on the agent that the current generation lacks.
    pub strays: usize,
    /// Owned services re-registered because the agent held a different version.
    pub repaired: usize,
    pub failures: usize,
}

impl NodeUnit {
    /// Additions, then removals, then promotion. Individual failures are
    /// logged and counted; the rest of the batch still runs.
    pub async fn apply(self, buckets: &mut NodeBuckets) -> NodeReport {
        let mut report = NodeReport {
            node_id: self.node_id.clone(),
            ..Default::default()
        };

        let mut failed_services = HashSet::new();
        for record in buckets.service_additions() {
            if self.register(&record, &mut report).await {
                report.services_added += 1;
            } else {
                failed_services.insert(record.id);
            }
        }

        for check in buckets.check_additions() {
            if failed_services.contains(&check.service_id) {
                debug!(check_id = %check.id, service_id = %check.service_id, "owning service not registered; skipping check");
                continue;
            }
            match self.agent.register_check(&check).await {
                Ok(()) => report.checks_added += 1,
                Err(e) => {
                    warn!(node_id = %self.node_id, check_id = %check.id, error = %e, "failed to register check");
                    report.failures += 1;
                }
            }
        }

        let current = buckets.current_services();
        let current_ids: HashSet<&str> = current.iter().map(|r| r.id.as_str()).collect();

        // Ids still wanted were overwritten by the registrations above.
        let mut removals: Vec<String> = buckets
            .service_removals()
            .into_iter()
            .map(|r| r.id)
            .filter(|id| !current_ids.contains(id.as_str()))
            .collect();

        if self.drift {
            for listed in self.listed_drift(&current).await {
                if current_ids.contains(listed.id.as_str()) {
                    if let Some(wanted) = current.iter().find(|r| r.id == listed.id) {
                        if self.register(wanted, &mut report).await {
                            report.repaired += 1;
                        }
                    }
                } else if !removals.contains(&listed.id) {
                    report.strays += 1;
                    removals.push(listed.id);
                }
            }
        }

        for id in removals {
            if self.deregister(DeregisterTarget::Service(id), &mut report).await {
                report.services_removed += 1;
            }
        }
        for check in buckets.check_removals() {
            if self.deregister(DeregisterTarget::Check(check.id), &mut report).await {
                report.checks_removed += 1;
            }
        }

        buckets.promote();
        report
    }

    async fn register(&self, record: &ServiceRecord, report: &mut NodeReport) -> bool {
        match self.agent.register_service(record).await {
            Ok(()) => {
                debug!(node_id = %self.node_id, service_id = %record.id, "registered service");
                true
            }
            Err(e) => {
                warn!(node_id = %self.node_id, service_id = %record.id, error = %e, "failed to register service");
                report.failures += 1;
                false
            }
        }
    }

    /// Owned services on the agent without a field-equal current record.
    async fn listed_drift(&self, current: &[ServiceRecord]) -> Vec<ServiceRecord> {
        match self.agent.list_services().await {
            Ok(listed) => listed
                .into_iter()
                .filter(|s| s.id.split(':').next() == Some(self.prefix.as_str()))
                .filter(|s| !current.contains(s))
                .collect(),
            Err(e) => {
                warn!(node_id = %self.node_id, error = %e, "failed to list agent services; skipping drift check");
                Vec::new()
            }
        }
    }

    /// Agent deregistration with a catalog fallback. Only a failed fallback
    /// counts as a failure.
    async fn deregister(&self, target: DeregisterTarget, report: &mut NodeReport) -> bool {
        let primary = match &target {
            DeregisterTarget::Service(id) => self.agent.deregister_service(id).await,
            DeregisterTarget::Check(id) => self.agent.deregister_check(id).await,
        };
        let Err(e) = primary else {
            debug!(node_id = %self.node_id, %target, "deregistered");
            return true;
        };

        debug!(node_id = %self.node_id, %target, error = %e, "agent deregistration failed; falling back to catalog");
        match self.client.catalog_deregister(&self.node_name, &target).await {
            Ok(()) => true,
            Err(e) => {
                warn!(node_id = %self.node_id, %target, error = %e, "catalog deregistration failed");
                report.failures += 1;
                false
            }
        }
    }
}
