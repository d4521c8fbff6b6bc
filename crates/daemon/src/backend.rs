use std::sync::Arc;

use discovery_core::address::AddressResolver;
use discovery_core::model::Snapshot;
use tracing::{info, warn};

use crate::agent::AgentError;
use crate::builtin::BuiltinEngine;
use crate::catalog::CatalogEngine;
use crate::config::ResolverConfig;
use crate::consul::ConsulClient;

/// A configured reconciliation target.
pub enum Backend {
    Builtin(BuiltinEngine),
    Catalog(CatalogEngine),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Builtin(_) => "builtin",
            Self::Catalog(_) => "consul",
        }
    }

    /// Projects the snapshot into this backend and logs the outcome. Errors
    /// are cycle-local.
    pub async fn reconcile(&mut self, snapshot: &Snapshot) -> Result<(), AgentError> {
        let backend = self.name();
        match self {
            Self::Builtin(engine) => {
                let records = engine.reconcile(snapshot);
                info!(backend, records, "published record table");
            }
            Self::Catalog(engine) => {
                let report = engine.reconcile(snapshot).await?;
                info!(
                    backend,
                    added = report.services_added(),
                    removed = report.services_removed(),
                    failures = report.failures(),
                    unreachable = report.unreachable.len(),
                    drift = report.drift,
                    "catalog reconciled"
                );
                if !report.unreachable.is_empty() {
                    warn!(backend, nodes = ?report.unreachable, "nodes without a live agent");
                }
            }
        }
        Ok(())
    }
}

/// Builds one backend per configured resolver.
pub fn build(resolvers: Vec<ResolverConfig>, address: &AddressResolver) -> Result<Vec<Backend>, AgentError> {
    resolvers
        .into_iter()
        .map(|resolver| match resolver {
            ResolverConfig::Builtin(cfg) => Ok(Backend::Builtin(BuiltinEngine::new(cfg, address.clone()))),
            ResolverConfig::Catalog(cfg) => {
                let client = ConsulClient::new(&cfg)?;
                Ok(Backend::Catalog(CatalogEngine::new(Arc::new(client), cfg, address.clone())))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuiltinConfig, CatalogConfig};

    #[test]
    fn builds_backends_in_order() {
        let backends = build(
            vec![
                ResolverConfig::Builtin(BuiltinConfig::default()),
                ResolverConfig::Catalog(CatalogConfig::default()),
            ],
            &AddressResolver::default(),
        )
        .unwrap();
        let names: Vec<_> = backends.iter().map(Backend::name).collect();
        assert_eq!(names, vec!["builtin", "consul"]);
    }
}
