//! Round-robin load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::distribution::{SharedDistribution, WeightDistribution};
use crate::load_balancer::endpoint::{EndpointList, ManagedEndpoint};
use crate::load_balancer::LoadBalancer;

/// Weighted round-robin selector.
///
/// An endpoint of weight `w` owns `w` slots of each rotation; slots are
/// interleaved so heavier endpoints are spread through the rotation instead of
/// served back to back. Advancing the rotation is a single atomic step.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    distribution: SharedDistribution,
}

impl WeightedRoundRobin {
    pub fn new(endpoints: Arc<EndpointList>) -> Self {
        Self {
            distribution: SharedDistribution::new(endpoints, false),
        }
    }

    /// Plain rotation: every endpoint with a non-zero weight gets one slot.
    pub fn unweighted(endpoints: Arc<EndpointList>) -> Self {
        Self {
            distribution: SharedDistribution::new(endpoints, true),
        }
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next(&self) -> Option<Arc<ManagedEndpoint>> {
        let distribution = self.distribution.load();
        let slot = distribution.next_slot()?;
        distribution.endpoint_for_slot(slot).cloned()
    }

    fn refresh(&self) {
        self.distribution.refresh();
    }

    fn distribution(&self) -> Arc<WeightDistribution> {
        self.distribution.load()
    }
}
