//! pod-broadcaster Library
//!
//! Fan-out gateway that broadcasts every request to all members of a
//! service and aggregates their answers. Exposed as a library for the
//! binary and for integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{BroadcastConfig, BroadcastService, CacheConfig, CacheStatus, TargetCache};
pub use config::load_config;
pub use domain::entities::{
    AggregateResult, InboundRequest, OutcomeValue, PerTargetOutcome, ServiceRef, TargetAddress,
    TargetSet,
};
pub use domain::errors::{CacheError, ConfigError, DispatchError, ResolveError};
pub use domain::ports::{MemberResolver, TargetClient};
pub use domain::value_objects::TargetScheme;
