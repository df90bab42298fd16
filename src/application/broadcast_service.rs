//! Broadcast Service - Fan-out aggregator use case
//!
//! Sends one inbound request to every cached target in parallel and
//! assembles the answers into a single composite result. Individual
//! target failures become error-valued outcomes; they never shrink the
//! result or abort the broadcast.

use crate::application::target_cache::TargetCache;
use crate::domain::entities::{
    AggregateResult, HeaderList, InboundRequest, OutboundRequest, PerTargetOutcome,
    TargetAddress, TargetSet,
};
use crate::domain::errors::{CacheError, DispatchError};
use crate::domain::ports::TargetClient;
use crate::domain::value_objects::TargetScheme;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Headers that describe the inbound connection rather than the request.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Broadcast tuning.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Port appended to bare target addresses
    pub target_port: u16,
    /// Scheme of the outbound calls
    pub scheme: TargetScheme,
    /// Deadline for each outbound call; `None` waits on the transport alone
    pub target_timeout: Option<Duration>,
    /// Upper bound on in-flight calls per broadcast; 0 means unbounded
    pub max_concurrency: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            target_port: 8080,
            scheme: TargetScheme::Http,
            target_timeout: Some(Duration::from_secs(10)),
            max_concurrency: 0,
        }
    }
}

/// Broadcast service - main application use case.
///
/// 1. Fetches the current targets from the cache
/// 2. Dispatches one copy of the request per target, concurrently
/// 3. Waits for every call and returns one outcome per target
pub struct BroadcastService {
    cache: TargetCache,
    client: Arc<dyn TargetClient>,
    config: BroadcastConfig,
}

impl BroadcastService {
    pub fn new(cache: TargetCache, client: Arc<dyn TargetClient>, config: BroadcastConfig) -> Self {
        Self {
            cache,
            client,
            config,
        }
    }

    pub fn cache(&self) -> &TargetCache {
        &self.cache
    }

    /// Broadcast `request` to every current target.
    ///
    /// Only a cache failure (no target set ever resolved) is an error.
    pub async fn broadcast(&self, request: InboundRequest) -> Result<AggregateResult, CacheError> {
        let targets = self.cache.get_targets().await?;

        let span = tracing::info_span!(
            "broadcast",
            id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path_and_query,
            targets = targets.len(),
        );

        Ok(self.broadcast_to(&targets, request).instrument(span).await)
    }

    /// Broadcast `request` to an explicit target set.
    pub async fn broadcast_to(&self, targets: &TargetSet, request: InboundRequest) -> AggregateResult {
        if targets.is_empty() {
            tracing::debug!("no targets, nothing dispatched");
            return AggregateResult::empty();
        }

        let started = Instant::now();
        let headers = forwarded_headers(&request.headers);
        // One limiter per broadcast; queued calls wait for a permit.
        let limiter = match self.config.max_concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let handles: Vec<(OutboundRequest, JoinHandle<PerTargetOutcome>)> = targets
            .iter()
            .map(|target| {
                let outbound = OutboundRequest {
                    target: target.clone(),
                    method: request.method.clone(),
                    url: self.target_url(target, &request.path_and_query),
                    headers: headers.clone(),
                    body: request.body.clone(),
                };
                let handle = tokio::spawn(
                    dispatch(
                        self.client.clone(),
                        limiter.clone(),
                        self.config.target_timeout,
                        outbound.clone(),
                    )
                    .in_current_span(),
                );
                (outbound, handle)
            })
            .collect();

        let mut result = Vec::with_capacity(handles.len());
        for (outbound, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("dispatch task for {} failed: {}", outbound.target, e);
                    let err = DispatchError::Transport(format!("dispatch task failed: {}", e));
                    PerTargetOutcome::from_error(&outbound, &err)
                }
            };
            result.push(outcome);
        }
        result.sort_by(|a, b| a.host.cmp(&b.host));

        let aggregate = AggregateResult { result };
        tracing::info!(
            "broadcast done targets={} failures={} elapsed_ms={}",
            aggregate.len(),
            aggregate.failures(),
            started.elapsed().as_millis()
        );
        aggregate
    }

    /// Outbound URL for `target`: configured scheme, target authority and
    /// the original path and query.
    pub fn target_url(&self, target: &TargetAddress, path_and_query: &str) -> String {
        let scheme = self.config.scheme;
        let authority = target.authority(self.config.target_port, scheme);
        if path_and_query.starts_with('/') {
            format!("{}://{}{}", scheme, authority, path_and_query)
        } else {
            format!("{}://{}/{}", scheme, authority, path_and_query)
        }
    }
}

async fn dispatch(
    client: Arc<dyn TargetClient>,
    limiter: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
    request: OutboundRequest,
) -> PerTargetOutcome {
    let _permit = match limiter {
        Some(limiter) => limiter.acquire_owned().await.ok(),
        None => None,
    };

    tracing::debug!("{} {}", request.method, request.url);
    let started = Instant::now();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, client.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(limit)),
        },
        None => client.send(&request).await,
    };

    match result {
        Ok(response) => {
            tracing::debug!(
                "{} answered {} in {}ms",
                request.target,
                response.status,
                started.elapsed().as_millis()
            );
            PerTargetOutcome::from_response(&request, response)
        }
        Err(e) => {
            tracing::warn!("{} unreachable: {}", request.target, e);
            PerTargetOutcome::from_error(&request, &e)
        }
    }
}

fn forwarded_headers(headers: &HeaderList) -> HeaderList {
    headers
        .iter()
        .filter(|(name, _)| {
            !SKIPPED_HEADERS
                .iter()
                .any(|skipped| name.eq_ignore_ascii_case(skipped))
        })
        .cloned()
        .collect()
}
