//! Application Layer
//!
//! Use cases built on the domain ports: the target cache actor and the
//! fan-out broadcast service.

pub mod broadcast_service;
pub mod target_cache;

pub use broadcast_service::{BroadcastConfig, BroadcastService};
pub use target_cache::{CacheConfig, CacheStatus, TargetCache};
