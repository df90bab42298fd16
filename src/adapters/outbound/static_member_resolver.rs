//! Static Member Resolver
//!
//! Implements MemberResolver with a fixed address list, for running the
//! broadcaster outside a cluster.

use crate::domain::entities::{ServiceRef, TargetAddress};
use crate::domain::errors::ResolveError;
use crate::domain::ports::MemberResolver;
use async_trait::async_trait;

/// Resolver that always answers with the same members.
#[derive(Debug, Clone, Default)]
pub struct StaticMemberResolver {
    members: Vec<TargetAddress>,
}

impl StaticMemberResolver {
    pub fn new(members: Vec<TargetAddress>) -> Self {
        Self { members }
    }

    /// Build from a comma-separated list, ignoring blanks.
    pub fn from_list(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(TargetAddress::from)
                .collect(),
        )
    }
}

#[async_trait]
impl MemberResolver for StaticMemberResolver {
    async fn resolve_members(
        &self,
        service: &ServiceRef,
    ) -> Result<Vec<TargetAddress>, ResolveError> {
        tracing::trace!("static members for {}: {:?}", service, self.members);
        Ok(self.members.clone())
    }
}
