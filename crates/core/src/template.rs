//! Health-check definitions referenced from task labels.
//!
//! A task opts in with a label such as
//! `ConsulHealthCheckKeys=nginx/port,nginx/http`. Each reference names a JSON
//! check definition stored under `healthchecks/<ref>` in the key-value store.
//! One definition may be shared by many services: its id is namespaced by the
//! owning service id and `{IP}` / `{PORT}` are filled in per service.

use thiserror::Error;

use crate::model::{HealthCheckRecord, Task};

/// Label key listing health-check references.
pub const HEALTH_CHECK_LABEL: &str = "ConsulHealthCheckKeys";

/// Key-value prefix the definitions live under.
pub const HEALTH_CHECK_PREFIX: &str = "healthchecks/";

const IP_PLACEHOLDER: &str = "{IP}";
const PORT_PLACEHOLDER: &str = "{PORT}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("malformed health check definition {reference}: {source}")]
    Malformed {
        reference: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("health check {check_id} needs {{PORT}} but service {service_id} has no port")]
    NoPort { check_id: String, service_id: String },
}

/// A definition to fetch and render for one service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Node whose bucket the rendered check belongs to.
    pub node_id: String,
    pub service_id: String,
    pub address: String,
    pub port: u16,
    /// Reference as written in the label, e.g. `nginx/http`.
    pub reference: String,
}

impl CheckRequest {
    /// Key-value path of the referenced definition.
    pub fn key(&self) -> String {
        definition_key(&self.reference)
    }
}

pub fn definition_key(reference: &str) -> String {
    format!("{HEALTH_CHECK_PREFIX}{reference}")
}

/// All references named by the task's health-check labels.
pub fn check_references(task: &Task) -> Vec<String> {
    task.label_values(HEALTH_CHECK_LABEL)
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decodes a stored definition and binds it to the requesting service.
pub fn render_check(definition: &[u8], req: &CheckRequest) -> Result<HealthCheckRecord, TemplateError> {
    let mut check: HealthCheckRecord =
        serde_json::from_slice(definition).map_err(|source| TemplateError::Malformed {
            reference: req.reference.clone(),
            source,
        })?;

    check.id = format!("{}:{}", check.id, req.service_id);
    check.service_id = req.service_id.clone();

    let body = &mut check.body;
    for target in [&mut body.http, &mut body.script, &mut body.tcp] {
        if target.is_empty() {
            continue;
        }
        if target.contains(PORT_PLACEHOLDER) && req.port == 0 {
            return Err(TemplateError::NoPort {
                check_id: check.id.clone(),
                service_id: req.service_id.clone(),
            });
        }
        *target = target
            .replace(IP_PLACEHOLDER, &req.address)
            .replace(PORT_PLACEHOLDER, &req.port.to_string());
    }

    Ok(check)
}
