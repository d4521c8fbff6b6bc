//! Catalog client speaking the Consul HTTP API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use discovery_core::model::{HealthCheckRecord, ServiceRecord};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{AgentError, CatalogAgent, CatalogClient, DeregisterTarget, Member};
use crate::config::CatalogConfig;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Connection details shared by the server client and every agent handle.
#[derive(Debug, Clone)]
struct Endpoint {
    http: Client,
    base: Url,
    datacenter: Option<String>,
    token: Option<String>,
}

impl Endpoint {
    fn new(http: Client, scheme: &str, address: &str, config: &CatalogConfig) -> Result<Self, AgentError> {
        let raw = format!("{scheme}://{address}/");
        let base = Url::parse(&raw).map_err(|e| AgentError::Url {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            base,
            datacenter: config.datacenter.clone(),
            token: config.token.clone(),
        })
    }

    /// `/v1/<segments...>`, each segment percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, AgentError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AgentError::Url {
                url: self.base.to_string(),
                reason: "cannot be a base".into(),
            })?
            .clear()
            .push("v1")
            .extend(segments);
        if let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.header(TOKEN_HEADER, token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, endpoint: &str) -> Result<Response, AgentError> {
        let resp = req.send().await.map_err(|source| AgentError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AgentError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn put<T: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: Option<&T>,
        endpoint: &str,
    ) -> Result<(), AgentError> {
        let mut req = self.request(Method::PUT, self.url(segments.iter().copied())?);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req, endpoint).await.map(|_| ())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, segments: &[&str], endpoint: &str) -> Result<T, AgentError> {
        let req = self.request(Method::GET, self.url(segments.iter().copied())?);
        let resp = self.send(req, endpoint).await?;
        resp.json::<T>().await.map_err(|source| AgentError::Request {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// Client for the catalog server configured in [`CatalogConfig::address`].
#[derive(Debug, Clone)]
pub struct ConsulClient {
    server: Endpoint,
    scheme: String,
    agent_port: u16,
    config: CatalogConfig,
}

impl ConsulClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, AgentError> {
        let agent_port = config
            .agent_port()
            .ok_or_else(|| AgentError::Url {
                url: config.address.clone(),
                reason: "missing port".into(),
            })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|source| AgentError::Request {
                endpoint: "client".into(),
                source,
            })?;
        Ok(Self {
            server: Endpoint::new(http, &config.scheme, &config.address, config)?,
            scheme: config.scheme.clone(),
            agent_port,
            config: config.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MemberEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Addr")]
    addr: String,
}

#[derive(Debug, Serialize)]
struct CatalogDeregistration<'a> {
    #[serde(rename = "Node")]
    node: &'a str,
    #[serde(rename = "Datacenter", skip_serializing_if = "Option::is_none")]
    datacenter: Option<&'a str>,
    #[serde(rename = "ServiceID", skip_serializing_if = "Option::is_none")]
    service_id: Option<&'a str>,
    #[serde(rename = "CheckID", skip_serializing_if = "Option::is_none")]
    check_id: Option<&'a str>,
}

#[async_trait]
impl CatalogClient for ConsulClient {
    async fn members(&self) -> Result<Vec<Member>, AgentError> {
        let entries: Vec<MemberEntry> = self.server.get_json(&["agent", "members"], "agent/members").await?;
        Ok(entries
            .into_iter()
            .map(|m| Member {
                name: m.name,
                addr: m.addr,
            })
            .collect())
    }

    async fn connect(&self, member: &Member) -> Result<Arc<dyn CatalogAgent>, AgentError> {
        let address = format!("{}:{}", member.addr, self.agent_port);
        debug!(member = %member.name, %address, "opening agent handle");
        let endpoint = Endpoint::new(self.server.http.clone(), &self.scheme, &address, &self.config)?;
        Ok(Arc::new(ConsulAgent { endpoint }))
    }

    async fn catalog_deregister(&self, node: &str, target: &DeregisterTarget) -> Result<(), AgentError> {
        let (service_id, check_id) = match target {
            DeregisterTarget::Service(id) => (Some(id.as_str()), None),
            DeregisterTarget::Check(id) => (None, Some(id.as_str())),
        };
        let body = CatalogDeregistration {
            node,
            datacenter: self.config.datacenter.as_deref(),
            service_id,
            check_id,
        };
        self.server
            .put(&["catalog", "deregister"], Some(&body), "catalog/deregister")
            .await
    }

    async fn get_key(&self, path: &str) -> Result<Option<Vec<u8>>, AgentError> {
        let mut url = self.server.url(std::iter::once("kv").chain(path.split('/')))?;
        url.query_pairs_mut().append_key_only("raw");
        let resp = self
            .server
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|source| AgentError::Request {
                endpoint: format!("kv/{path}"),
                source,
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Status {
                endpoint: format!("kv/{path}"),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let bytes = resp.bytes().await.map_err(|source| AgentError::Request {
            endpoint: format!("kv/{path}"),
            source,
        })?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Handle to the agent on one node.
#[derive(Debug, Clone)]
pub struct ConsulAgent {
    endpoint: Endpoint,
}

/// Service entry as returned by the agent's listing.
#[derive(Debug, Deserialize)]
struct ListedService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
}

impl From<ListedService> for ServiceRecord {
    fn from(s: ListedService) -> Self {
        ServiceRecord::new(s.id, s.service, s.address, s.port, s.tags.unwrap_or_default())
    }
}

#[async_trait]
impl CatalogAgent for ConsulAgent {
    async fn self_check(&self) -> Result<(), AgentError> {
        let req = self.endpoint.request(Method::GET, self.endpoint.url(["agent", "self"])?);
        self.endpoint.send(req, "agent/self").await.map(|_| ())
    }

    async fn register_service(&self, record: &ServiceRecord) -> Result<(), AgentError> {
        self.endpoint
            .put(&["agent", "service", "register"], Some(record), "agent/service/register")
            .await
    }

    async fn deregister_service(&self, id: &str) -> Result<(), AgentError> {
        self.endpoint
            .put::<()>(&["agent", "service", "deregister", id], None, "agent/service/deregister")
            .await
    }

    async fn register_check(&self, check: &HealthCheckRecord) -> Result<(), AgentError> {
        self.endpoint
            .put(&["agent", "check", "register"], Some(check), "agent/check/register")
            .await
    }

    async fn deregister_check(&self, id: &str) -> Result<(), AgentError> {
        self.endpoint
            .put::<()>(&["agent", "check", "deregister", id], None, "agent/check/deregister")
            .await
    }

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, AgentError> {
        let listed: BTreeMap<String, ListedService> =
            self.endpoint.get_json(&["agent", "services"], "agent/services").await?;
        Ok(listed.into_values().map(ServiceRecord::from).collect())
    }
}
