//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Flow decided to forward → endpoint group identified
//!     → group.rs (group lookup, target override)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (interleaved weighted rotation)
//!         - random.rs (weighted random draw)
//!     → distribution.rs (current weight snapshot, one atomic load)
//!     → Return endpoint or None (no route)
//!
//! Membership change (deploy, add, remove, reload):
//!     → endpoint.rs (new EndpointList snapshot, generation + 1)
//!     → LoadBalancer::refresh (rebuild + atomic swap of the distribution)
//! ```
//!
//! # Design Decisions
//! - Selection never blocks and never observes a half-built distribution
//! - Writers replace whole values; readers never lock
//! - Zero-weight endpoints are members but never selected
//! - Availability is checked by the caller, not by the strategies

pub mod distribution;
pub mod endpoint;
pub mod group;
pub mod random;
pub mod round_robin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::load_balancer::distribution::WeightDistribution;
use crate::load_balancer::endpoint::{EndpointList, ManagedEndpoint};
use crate::load_balancer::random::WeightedRandom;
use crate::load_balancer::round_robin::WeightedRoundRobin;

pub use endpoint::{EndpointDefinition, HealthState};
pub use group::{EndpointGroup, EndpointManager};

/// Selects one endpoint of a live endpoint list.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Next endpoint, or None when no endpoint carries weight.
    fn next(&self) -> Option<Arc<ManagedEndpoint>>;

    /// Rebuild the selection state from the current membership.
    fn refresh(&self);

    /// The snapshot selections currently run against.
    fn distribution(&self) -> Arc<WeightDistribution>;
}

/// Load balancing algorithm of an endpoint group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerKind {
    #[default]
    RoundRobin,
    Random,
    WeightedRoundRobin,
    WeightedRandom,
}

impl LoadBalancerKind {
    /// Build a load balancer over `endpoints`.
    pub fn build(self, endpoints: Arc<EndpointList>) -> Box<dyn LoadBalancer> {
        match self {
            LoadBalancerKind::RoundRobin => Box::new(WeightedRoundRobin::unweighted(endpoints)),
            LoadBalancerKind::Random => Box::new(WeightedRandom::unweighted(endpoints)),
            LoadBalancerKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(endpoints)),
            LoadBalancerKind::WeightedRandom => Box::new(WeightedRandom::new(endpoints)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerKind::RoundRobin => "round-robin",
            LoadBalancerKind::Random => "random",
            LoadBalancerKind::WeightedRoundRobin => "weighted-round-robin",
            LoadBalancerKind::WeightedRandom => "weighted-random",
        }
    }
}
