//! Service discovery through a Registry TAP (RegTAP) endpoint.
//!
//! The registry is itself a TAP service; discovery is an ADQL query joining
//! `rr.resource`, `rr.capability` and `rr.interface`. Discovery only returns
//! service descriptors. Inspecting what those services hold is a separate
//! step ([`super::TapClient::list_tables`]).

use std::collections::HashSet;
use tracing::{debug, info};

use super::tap::TapClient;
use super::HttpClient;
use crate::adql::string_literal;
use crate::errors::VoResult;
use crate::schema::{ServiceDescriptor, ServiceKind};
use crate::votable::{ResultTable, Value};

#[derive(Debug, Clone)]
pub struct RegistryClient {
    tap: TapClient,
    registry: ServiceDescriptor,
}

impl RegistryClient {
    /// Uses the registry URL from the client configuration.
    pub fn new(http: HttpClient) -> Self {
        let registry = ServiceDescriptor::new(
            "ivo://registry/regtap",
            "Registry",
            ServiceKind::TableAccess,
            http.config().registry_url.clone(),
        );
        Self {
            tap: TapClient::new(http),
            registry,
        }
    }

    /// Services of `kind` whose title or description contains any of `keywords`.
    ///
    /// With `include_auxiliary`, services that only declare the capability as
    /// auxiliary (`#aux` standard ids, e.g. a TAP service advertised from a
    /// data collection record) are included too. Results are unique per
    /// `(ivoid, kind)`, ordered by ivoid.
    pub fn search(
        &self,
        kind: ServiceKind,
        keywords: &[String],
        include_auxiliary: bool,
    ) -> VoResult<Vec<ServiceDescriptor>> {
        let query = registry_query(kind, keywords, include_auxiliary);
        debug!(query = %query, "registry search");
        let result = self.tap.search_sync(&self.registry, &query, &[])?;
        let services = descriptors_from_result(&result);
        info!(%kind, count = services.len(), "registry search finished");
        Ok(services)
    }
}

pub(crate) fn registry_query(kind: ServiceKind, keywords: &[String], include_auxiliary: bool) -> String {
    let standard = kind.standard_id();
    let mut constraints = vec![
        format!("standard_id LIKE {}", string_literal(&format!("{}%", standard))),
        "intf_type = 'vs:paramhttp'".to_string(),
    ];
    if !include_auxiliary {
        constraints.push("standard_id NOT LIKE '%#aux%'".to_string());
    }

    let words: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .flat_map(|k| {
            let literal = string_literal(k);
            [
                format!("1=ivo_hasword(res_title, {})", literal),
                format!("1=ivo_hasword(res_description, {})", literal),
            ]
        })
        .collect();
    if !words.is_empty() {
        constraints.push(format!("({})", words.join(" OR ")));
    }

    format!(
        "SELECT ivoid, res_title, res_description, access_url, standard_id \
         FROM rr.resource NATURAL JOIN rr.capability NATURAL JOIN rr.interface \
         WHERE {} ORDER BY ivoid",
        constraints.join(" AND ")
    )
}

fn cell(table: &ResultTable, row: &[Value], column: &str) -> Option<String> {
    let index = table.column_index(column)?;
    match &row[index] {
        Value::Null => None,
        other => {
            let text = other.to_string();
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
    }
}

pub(crate) fn descriptors_from_result(result: &ResultTable) -> Vec<ServiceDescriptor> {
    let mut seen = HashSet::new();
    let mut services = Vec::new();

    for row in result.rows() {
        let (Some(ivoid), Some(access_url), Some(standard_id)) = (
            cell(result, row, "ivoid"),
            cell(result, row, "access_url"),
            cell(result, row, "standard_id"),
        ) else {
            continue;
        };
        let Some(kind) = ServiceKind::from_standard_id(&standard_id) else {
            continue;
        };
        if !seen.insert((ivoid.clone(), kind)) {
            continue;
        }

        services.push(ServiceDescriptor {
            title: cell(result, row, "res_title").unwrap_or_else(|| ivoid.clone()),
            description: cell(result, row, "res_description"),
            ivoid,
            kind,
            access_url,
        });
    }

    services
}
