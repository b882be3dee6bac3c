//! HTTP seam between the fetch client and the network.

use crate::error::TransportError;

/// Status line and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues blocking GET requests. Implementations must be shareable across
/// pool workers.
///
/// Any HTTP status, including errors, comes back as `Ok`; `Err` is reserved for
/// exchanges that produced no response at all (DNS, connect, timeout, body
/// decoding).
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, user_agent: &str) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "http")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "http")]
mod reqwest_transport {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use reqwest::header::USER_AGENT;

    use super::{HttpResponse, Transport};
    use crate::error::{CellfetchError, Result, TransportError};

    /// Blocking `reqwest` client with a per-request timeout.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| CellfetchError::HttpClient {
                    reason: err.to_string(),
                })?;
            Ok(Self { client })
        }
    }

    impl Transport for ReqwestTransport {
        fn get(
            &self,
            url: &str,
            user_agent: &str,
        ) -> std::result::Result<HttpResponse, TransportError> {
            let response = self
                .client
                .get(url)
                .header(USER_AGENT, user_agent)
                .send()
                .map_err(|err| {
                    if err.is_timeout() {
                        TransportError::Timeout(err.to_string())
                    } else if err.is_connect() {
                        TransportError::Connect(err.to_string())
                    } else {
                        TransportError::Request(err.to_string())
                    }
                })?;
            let status = response.status().as_u16();
            let body = response.text().map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(err.to_string())
                } else {
                    TransportError::Body(err.to_string())
                }
            })?;
            Ok(HttpResponse { status, body })
        }
    }
}
