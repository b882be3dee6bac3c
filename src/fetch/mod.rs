//! Lookup client: builds the request, issues it, classifies the answer.
//!
//! Every call ends in exactly one of: a [`CellRecord`], or a [`FetchFailure`]
//! telling the caller whether to drop the item (`Format`, `Domain`,
//! `Transport`) or go through the throttle path (`RateLimited`).

pub mod response;
pub mod template;
pub mod transport;

use std::sync::Arc;

pub use response::ParsedBody;
pub use template::UrlTemplate;
pub use transport::{HttpResponse, Transport};

use crate::constants::{ERRCODE_OK, describe_errcode};
use crate::error::FetchFailure;
use crate::types::{CellIdentifier, CellRecord, FetchConfig, ResponseFormat};

/// Which configured template a request goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Primary,
    Fallback,
}

impl Endpoint {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Resolves identifiers against the lookup service.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    primary: UrlTemplate,
    fallback: Option<UrlTemplate>,
    user_agent: String,
    rate_limit_status: u16,
    format: ResponseFormat,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .field("rate_limit_status", &self.rate_limit_status)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    #[must_use]
    pub fn new(config: &FetchConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            primary: UrlTemplate::new(config.primary_url.clone()),
            fallback: config.fallback_url.clone().map(UrlTemplate::new),
            user_agent: config.user_agent.clone(),
            rate_limit_status: config.rate_limit_status,
            format: config.format,
        }
    }

    /// Client backed by a real `reqwest` transport.
    #[cfg(feature = "http")]
    pub fn with_http(config: &FetchConfig) -> crate::Result<Self> {
        let transport = transport::ReqwestTransport::new(config.timeout())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Look up `id` through the primary template.
    pub fn fetch(&self, id: &CellIdentifier) -> Result<CellRecord, FetchFailure> {
        self.fetch_via(Endpoint::Primary, id)
    }

    /// Look up `id` through the fallback template. Without one configured this
    /// reports `RateLimited` so the caller takes the requeue path.
    pub fn fetch_fallback(&self, id: &CellIdentifier) -> Result<CellRecord, FetchFailure> {
        self.fetch_via(Endpoint::Fallback, id)
    }

    pub fn fetch_via(
        &self,
        endpoint: Endpoint,
        id: &CellIdentifier,
    ) -> Result<CellRecord, FetchFailure> {
        if !id.is_complete() {
            return Err(FetchFailure::Format {
                reason: format!("incomplete identifier `{id}`"),
            });
        }
        let template = match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Fallback => match &self.fallback {
                Some(template) => template,
                None => return Err(FetchFailure::RateLimited),
            },
        };
        let url = template.render(id);
        tracing::debug!(target: "cellfetch::fetch", endpoint = endpoint.label(), %url, "request");

        let response = self.transport.get(&url, &self.user_agent).map_err(|err| {
            tracing::warn!(target: "cellfetch::fetch", endpoint = endpoint.label(), %url, %err, "no response");
            FetchFailure::from(err)
        })?;
        self.classify(id, &response)
    }

    /// Map one HTTP exchange onto the outcome table.
    ///
    /// Only the HTTP status signals throttling. Body error codes from the
    /// known table are domain failures; any other code still carries data
    /// and is kept.
    pub fn classify(
        &self,
        id: &CellIdentifier,
        response: &HttpResponse,
    ) -> Result<CellRecord, FetchFailure> {
        if response.status == self.rate_limit_status {
            return Err(FetchFailure::RateLimited);
        }
        if !response.is_success() {
            return Err(FetchFailure::Transport {
                reason: format!("unexpected http status {}", response.status),
            });
        }

        let body = self.format.parse(&response.body)?;
        if let Some(code) = body.errcode.filter(|&code| code != ERRCODE_OK) {
            if let Some(message) = describe_errcode(code) {
                return Err(FetchFailure::Domain {
                    code,
                    message: message.to_string(),
                });
            }
            tracing::debug!(target: "cellfetch::fetch", %id, code, "unlisted errcode; keeping response");
        }
        Ok(CellRecord {
            key: None,
            identifier: *id,
            lat: body.lat,
            lon: body.lon,
            address: body.address,
            radius: body.radius,
        })
    }
}
