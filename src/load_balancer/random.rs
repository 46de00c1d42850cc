//! Random load balancing strategy.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::distribution::{SharedDistribution, WeightDistribution};
use crate::load_balancer::endpoint::{EndpointList, ManagedEndpoint};
use crate::load_balancer::LoadBalancer;

/// Weighted random selector.
///
/// Draws uniformly in `[0, weight_sum)` and binary-searches the cumulative
/// weights, so endpoint `i` is picked with probability `weight_i / weight_sum`.
#[derive(Debug)]
pub struct WeightedRandom {
    distribution: SharedDistribution,
}

impl WeightedRandom {
    pub fn new(endpoints: Arc<EndpointList>) -> Self {
        Self {
            distribution: SharedDistribution::new(endpoints, false),
        }
    }

    /// Uniform draw over every endpoint with a non-zero weight.
    pub fn unweighted(endpoints: Arc<EndpointList>) -> Self {
        Self {
            distribution: SharedDistribution::new(endpoints, true),
        }
    }
}

impl LoadBalancer for WeightedRandom {
    fn next(&self) -> Option<Arc<ManagedEndpoint>> {
        let distribution = self.distribution.load();
        if distribution.weight_sum() == 0 {
            return None;
        }
        let draw = rand::thread_rng().gen_range(0..distribution.weight_sum());
        distribution.endpoint_for_draw(draw).cloned()
    }

    fn refresh(&self) {
        self.distribution.refresh();
    }

    fn distribution(&self) -> Arc<WeightDistribution> {
        self.distribution.load()
    }
}
