//! Simple Cone Search client.
//!
//! A cone search takes only a position and a radius and returns every column
//! of the matching rows. Services answer with a VOTable; errors come back as
//! an `INFO` or `PARAM` named `Error` inside an otherwise successful response.

use tracing::debug;

use super::HttpClient;
use crate::errors::{VoError, VoResult};
use crate::schema::{ServiceDescriptor, ServiceKind};
use crate::votable::{parse_votable, ResultTable};

/// Parameters for a cone search query, all in degrees (ICRS).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeSearchParams {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub radius_deg: f64,
    /// SCS verbosity (1 = minimal, 3 = all columns); service default when unset.
    pub verbosity: Option<u8>,
}

impl ConeSearchParams {
    pub fn new(ra_deg: f64, dec_deg: f64, radius_deg: f64) -> Self {
        Self {
            ra_deg,
            dec_deg,
            radius_deg,
            verbosity: None,
        }
    }

    pub fn validate(&self) -> VoResult<()> {
        if !(0.0..360.0).contains(&self.ra_deg) {
            return Err(VoError::invalid_argument(format!(
                "RA {} outside [0, 360)",
                self.ra_deg
            )));
        }
        if !(-90.0..=90.0).contains(&self.dec_deg) {
            return Err(VoError::invalid_argument(format!(
                "Dec {} outside [-90, 90]",
                self.dec_deg
            )));
        }
        if !(self.radius_deg > 0.0 && self.radius_deg <= 180.0) {
            return Err(VoError::invalid_argument(format!(
                "radius {} outside (0, 180]",
                self.radius_deg
            )));
        }
        if let Some(verb) = self.verbosity {
            if !(1..=3).contains(&verb) {
                return Err(VoError::invalid_argument(format!(
                    "verbosity {} outside 1..=3",
                    verb
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConeSearchClient {
    http: HttpClient,
}

impl ConeSearchClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Rows of `service` within the cone.
    pub fn search(&self, service: &ServiceDescriptor, params: &ConeSearchParams) -> VoResult<ResultTable> {
        if service.kind != ServiceKind::ConeSearch {
            return Err(VoError::invalid_argument(format!(
                "{} is a {} service, not cone-search",
                service.ivoid, service.kind
            )));
        }
        params.validate()?;

        let mut query = vec![
            ("RA", params.ra_deg.to_string()),
            ("DEC", params.dec_deg.to_string()),
            ("SR", params.radius_deg.to_string()),
        ];
        if let Some(verb) = params.verbosity {
            query.push(("VERB", verb.to_string()));
        }

        debug!(service = %service.ivoid, ?params, "cone search");
        let body = self.http.get_text(&service.access_url, &query)?;
        parse_votable(&body)
    }
}
