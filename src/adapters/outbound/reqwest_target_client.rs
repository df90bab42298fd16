//! Reqwest Target Client
//!
//! Implements TargetClient over a shared `reqwest` connection pool.

use crate::domain::entities::{OutboundRequest, TargetResponse};
use crate::domain::errors::DispatchError;
use crate::domain::ports::TargetClient;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

/// Outbound transport for broadcast copies.
#[derive(Clone)]
pub struct ReqwestTargetClient {
    client: reqwest::Client,
}

impl ReqwestTargetClient {
    /// Create a client. Redirects are returned to the caller, not followed.
    ///
    /// `accept_invalid_certs` skips TLS verification for `https` targets,
    /// whose certificates rarely name the pod IP they are reached on.
    pub fn new(accept_invalid_certs: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn build(&self, request: &OutboundRequest) -> Result<reqwest::Request, DispatchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
            headers.append(name, value);
        }

        self.client
            .request(method, &request.url)
            .headers(headers)
            .body(request.body.clone())
            .build()
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl TargetClient for ReqwestTargetClient {
    async fn send(&self, request: &OutboundRequest) -> Result<TargetResponse, DispatchError> {
        let outbound = self.build(request)?;

        let response = self
            .client
            .execute(outbound)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(TargetResponse { status, body })
    }
}
