//! Target Client Port
//!
//! Defines the outbound transport used to deliver one copy of a broadcast.

use crate::domain::entities::{OutboundRequest, TargetResponse};
use crate::domain::errors::DispatchError;
use async_trait::async_trait;

/// Sends a single request to a single target.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Deliver `request` and read the whole response body.
    ///
    /// Any HTTP status counts as a response; only transport failures
    /// are errors.
    async fn send(&self, request: &OutboundRequest) -> Result<TargetResponse, DispatchError>;
}
