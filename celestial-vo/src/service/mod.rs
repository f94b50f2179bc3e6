//! Thin clients for the remote VO services.
//!
//! | Module | Protocol |
//! |--------|----------|
//! | [`registry`] | RegTAP service discovery |
//! | [`cone`] | Simple Cone Search 1.03 |
//! | [`tap`] | TAP 1.1 sync/async queries, uploads, `TAP_SCHEMA` introspection |
//! | [`uws`] | UWS job phases and job documents |
//!
//! All clients share one blocking [`HttpClient`]. Every call is a network
//! round trip; nothing is cached here (see [`crate::batch::SchemaSnapshot`]).

pub mod cone;
pub mod registry;
pub mod tap;
pub mod uws;

pub use cone::{ConeSearchClient, ConeSearchParams};
pub use registry::RegistryClient;
pub use tap::{ExecutionMode, TapClient, Upload};
pub use uws::JobPhase;

use reqwest::blocking::{multipart, Client, Response};
use tracing::trace;

use crate::config::ClientConfig;
use crate::errors::{VoError, VoResult};
use crate::votable::parse_votable;

const MAX_ERROR_TEXT: usize = 200;

/// Blocking HTTP client configured from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> VoResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()
            .map_err(|e| VoError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn get_text(&self, url: &str, query: &[(&str, String)]) -> VoResult<String> {
        trace!(url, ?query, "GET");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| VoError::http(url, e))?;
        read_text(url, check_status(url, response)?)
    }

    pub(crate) fn post_form(&self, url: &str, params: &[(&str, String)]) -> VoResult<Response> {
        trace!(url, ?params, "POST");
        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .map_err(|e| VoError::http(url, e))?;
        check_status(url, response)
    }

    pub(crate) fn post_multipart(&self, url: &str, form: multipart::Form) -> VoResult<Response> {
        trace!(url, "POST multipart");
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(|e| VoError::http(url, e))?;
        check_status(url, response)
    }

    pub(crate) fn delete(&self, url: &str) -> VoResult<()> {
        trace!(url, "DELETE");
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|e| VoError::http(url, e))?;
        check_status(url, response).map(|_| ())
    }
}

fn check_status(url: &str, response: Response) -> VoResult<Response> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().ok().and_then(|body| error_message(&body));
        return Err(VoError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

/// Service error text from a failed response body.
///
/// DALI services answer errors with a VOTable carrying `QUERY_STATUS=ERROR`;
/// some send plain text instead. HTML error pages yield nothing.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if body.starts_with('<') {
        return match parse_votable(body) {
            Err(VoError::Query { message }) => Some(message),
            _ => None,
        };
    }
    let line = body.lines().next().unwrap_or(body).trim();
    Some(line.chars().take(MAX_ERROR_TEXT).collect())
}

pub(crate) fn read_text(url: &str, response: Response) -> VoResult<String> {
    response
        .text()
        .map_err(|e| VoError::http(url, format!("Failed to read response: {}", e)))
}

/// Joins a service base URL and a path segment without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
