//! Target Cache
//!
//! Keeps the resolved target list of one service behind a time-based cache.
//! The list is owned by a single actor task; callers talk to it over a
//! request channel and receive the answer on a oneshot reply, so refreshes
//! are serialized without locks and a burst of callers during a refresh
//! triggers at most one resolution.

use crate::domain::entities::{ServiceRef, TargetSet};
use crate::domain::errors::{CacheError, ResolveError};
use crate::domain::ports::MemberResolver;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

const COMMAND_BUFFER: usize = 1024;

/// Target cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a resolved target set is served without asking the resolver again
    pub refresh_interval: Duration,
    /// Minimum wait between resolver calls after a failed refresh
    pub retry_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Point-in-time view of the cache, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    /// Size of the target set currently served
    pub targets: usize,
    /// Whether any resolution ever succeeded
    pub resolved: bool,
    /// Successful resolutions so far
    pub resolutions: u64,
    /// Failed resolutions so far
    pub failures: u64,
    /// Error of the most recent refresh, cleared by the next success
    pub last_error: Option<ResolveError>,
    /// Time since the served set was resolved
    pub age: Option<Duration>,
}

enum CacheCommand {
    GetTargets(oneshot::Sender<Result<TargetSet, CacheError>>),
    Status(oneshot::Sender<CacheStatus>),
}

/// Handle to the target cache actor.
///
/// Cheap to clone. The actor stops once every handle has been dropped.
#[derive(Clone)]
pub struct TargetCache {
    commands: mpsc::Sender<CacheCommand>,
}

impl TargetCache {
    /// Spawn the cache actor for `service` on the current runtime.
    ///
    /// Nothing is resolved until the first caller asks for targets.
    pub fn spawn(
        resolver: Arc<dyn MemberResolver>,
        service: ServiceRef,
        config: CacheConfig,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);

        let actor = CacheActor {
            resolver,
            service,
            config,
            state: None,
            retry_at: None,
            last_error: None,
            resolutions: 0,
            failures: 0,
        };
        tokio::spawn(actor.run(rx));

        Self { commands }
    }

    /// Get the current target set, refreshing it first if it has expired.
    ///
    /// Fails only when no target set was ever resolved.
    pub async fn get_targets(&self) -> Result<TargetSet, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CacheCommand::GetTargets(reply))
            .await
            .map_err(|_| CacheError::Closed)?;
        rx.await.map_err(|_| CacheError::Closed)?
    }

    /// Report the cache state without triggering a refresh.
    pub async fn status(&self) -> Result<CacheStatus, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CacheCommand::Status(reply))
            .await
            .map_err(|_| CacheError::Closed)?;
        rx.await.map_err(|_| CacheError::Closed)
    }
}

struct CacheState {
    current_targets: TargetSet,
    resolved_at: Instant,
    /// Always `resolved_at + refresh_interval`
    expires_at: Instant,
}

struct CacheActor {
    resolver: Arc<dyn MemberResolver>,
    service: ServiceRef,
    config: CacheConfig,
    state: Option<CacheState>,
    retry_at: Option<Instant>,
    last_error: Option<ResolveError>,
    resolutions: u64,
    failures: u64,
}

impl CacheActor {
    async fn run(mut self, mut commands: mpsc::Receiver<CacheCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                CacheCommand::GetTargets(reply) => {
                    let result = self.targets().await;
                    let _ = reply.send(result);
                }
                CacheCommand::Status(reply) => {
                    let _ = reply.send(self.status());
                }
            }
        }

        tracing::debug!("target cache for {} stopped", self.service);
    }

    async fn targets(&mut self) -> Result<TargetSet, CacheError> {
        if self.needs_refresh(Instant::now()) {
            self.refresh().await;
        }

        match (&self.state, &self.last_error) {
            (Some(state), _) => Ok(state.current_targets.clone()),
            (None, Some(err)) => Err(CacheError::Resolution(err.clone())),
            (None, None) => Ok(TargetSet::default()),
        }
    }

    fn needs_refresh(&self, now: Instant) -> bool {
        if matches!(self.retry_at, Some(retry_at) if now < retry_at) {
            return false;
        }

        match &self.state {
            Some(state) => now >= state.expires_at,
            None => true,
        }
    }

    async fn refresh(&mut self) {
        tracing::debug!("updating service targets for {}", self.service);

        match self.resolver.resolve_members(&self.service).await {
            Ok(members) => {
                let resolved_at = Instant::now();
                tracing::info!("resolved {} targets for {}", members.len(), self.service);
                tracing::debug!("targets: {:?}", members);

                self.state = Some(CacheState {
                    current_targets: TargetSet::new(members),
                    resolved_at,
                    expires_at: resolved_at + self.config.refresh_interval,
                });
                self.resolutions += 1;
                self.retry_at = None;
                self.last_error = None;
            }
            Err(e) => {
                self.failures += 1;
                self.retry_at = Some(Instant::now() + self.config.retry_backoff);

                match &self.state {
                    Some(state) => tracing::warn!(
                        "failed to resolve {}: {}; serving {} stale targets",
                        self.service,
                        e,
                        state.current_targets.len()
                    ),
                    None => tracing::error!("failed to resolve {}: {}", self.service, e),
                }
                self.last_error = Some(e);
            }
        }
    }

    fn status(&self) -> CacheStatus {
        let now = Instant::now();
        CacheStatus {
            targets: self
                .state
                .as_ref()
                .map(|s| s.current_targets.len())
                .unwrap_or(0),
            resolved: self.state.is_some(),
            resolutions: self.resolutions,
            failures: self.failures,
            last_error: self.last_error.clone(),
            age: self.state.as_ref().map(|s| now - s.resolved_at),
        }
    }
}
