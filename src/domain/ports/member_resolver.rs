//! Member Resolver Port
//!
//! Defines the interface for discovering the current members of a service.
//! Implementations may query the Kubernetes API, DNS, or a static list.

use crate::domain::entities::{ServiceRef, TargetAddress};
use crate::domain::errors::ResolveError;
use async_trait::async_trait;

/// Resolver for the member addresses of a service.
///
/// This is an outbound port that abstracts the endpoint directory.
/// The target cache calls it on refresh; it is never called by the
/// aggregator directly.
#[async_trait]
pub trait MemberResolver: Send + Sync {
    /// Return the current member addresses, in directory order.
    ///
    /// A service with no members yields an empty list, not an error.
    async fn resolve_members(&self, service: &ServiceRef)
        -> Result<Vec<TargetAddress>, ResolveError>;
}
