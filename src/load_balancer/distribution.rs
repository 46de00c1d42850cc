//! Weight distribution snapshots.
//!
//! # Responsibilities
//! - Precompute cumulative weights of an endpoint snapshot (random draws)
//! - Precompute the interleaved round-robin schedule (weighted rotation)
//! - Track the remaining slots of the current rotation
//! - Swap whole distributions atomically when membership changes
//!
//! # Interleaved schedule
//! ```text
//! weights [e1=3, e2=1, e3=2]
//! round 0: e1 e2 e3      members with weight > 0
//! round 1: e1 e3         members with weight > 1
//! round 2: e1            members with weight > 2
//! slots:   e1 e2 e3 e1 e3 e1   (weight_sum = 6)
//! ```
//! Rounds with the same member set are stored once as a segment, so a slot
//! maps to its endpoint with one binary search.
//!
//! # Design Decisions
//! - A distribution is never field-mutated apart from its rotation countdown
//! - Readers take one atomic load and work on that snapshot only
//! - A refresh never replaces a distribution built from a newer membership
//! - Zero-weight endpoints own no slot and no cumulative range

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::load_balancer::endpoint::{EndpointList, EndpointSnapshot, ManagedEndpoint};

/// Consecutive rounds sharing the same members.
#[derive(Debug)]
struct Segment {
    first_slot: u64,
    members: Vec<usize>,
}

/// Immutable weight table computed from one endpoint snapshot.
#[derive(Debug)]
pub struct WeightDistribution {
    generation: u64,
    endpoints: Vec<Arc<ManagedEndpoint>>,
    cumulative: Vec<u64>,
    weight_sum: u64,
    segments: Vec<Segment>,
    remaining: AtomicU64,
}

impl WeightDistribution {
    /// Build the distribution of `snapshot`. `uniform` counts every non-zero weight as 1.
    pub fn build(snapshot: &EndpointSnapshot, uniform: bool) -> Self {
        let endpoints = snapshot.endpoints().to_vec();
        let weights: Vec<u64> = endpoints
            .iter()
            .map(|e| {
                let weight = u64::from(e.weight());
                if uniform {
                    weight.min(1)
                } else {
                    weight
                }
            })
            .collect();

        let mut cumulative = Vec::with_capacity(weights.len());
        let mut weight_sum = 0u64;
        for weight in &weights {
            weight_sum += weight;
            cumulative.push(weight_sum);
        }

        Self {
            generation: snapshot.generation(),
            endpoints,
            cumulative,
            weight_sum,
            segments: interleave(&weights),
            remaining: AtomicU64::new(weight_sum),
        }
    }

    /// Generation of the endpoint snapshot this was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoints(&self) -> &[Arc<ManagedEndpoint>] {
        &self.endpoints
    }

    pub fn cumulative(&self) -> &[u64] {
        &self.cumulative
    }

    pub fn weight_sum(&self) -> u64 {
        self.weight_sum
    }

    /// Slots left in the current rotation.
    pub fn remaining_sum(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Endpoint owning the cumulative range containing `draw` (`draw < weight_sum`).
    pub fn endpoint_for_draw(&self, draw: u64) -> Option<&Arc<ManagedEndpoint>> {
        if draw >= self.weight_sum {
            return None;
        }
        let index = self.cumulative.partition_point(|&bound| bound <= draw);
        self.endpoints.get(index)
    }

    /// Endpoint owning rotation slot `slot` (`slot < weight_sum`).
    pub fn endpoint_for_slot(&self, slot: u64) -> Option<&Arc<ManagedEndpoint>> {
        if slot >= self.weight_sum {
            return None;
        }
        let segment_index = self.segments.partition_point(|s| s.first_slot <= slot).checked_sub(1)?;
        let segment = &self.segments[segment_index];
        let offset = (slot - segment.first_slot) as usize;
        let member = segment.members[offset % segment.members.len()];
        self.endpoints.get(member)
    }

    /// Claim the next rotation slot: one atomic countdown step, reset when exhausted.
    ///
    /// Concurrent callers always claim distinct slots within a rotation.
    pub fn next_slot(&self) -> Option<u64> {
        let sum = self.weight_sum;
        if sum == 0 {
            return None;
        }
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                Some(if remaining == 0 { sum - 1 } else { remaining - 1 })
            })
            .unwrap_or(sum);
        Some(if previous == 0 { 0 } else { sum - previous })
    }
}

/// Group rounds of the interleaved schedule into segments.
fn interleave(weights: &[u64]) -> Vec<Segment> {
    let mut thresholds: Vec<u64> = weights.iter().copied().filter(|&w| w > 0).collect();
    thresholds.sort_unstable();
    thresholds.dedup();

    let mut segments = Vec::with_capacity(thresholds.len());
    let mut first_slot = 0u64;
    let mut previous = 0u64;
    for threshold in thresholds {
        let members: Vec<usize> = weights
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w >= threshold)
            .map(|(index, _)| index)
            .collect();
        let rounds = threshold - previous;
        let slots = rounds * members.len() as u64;
        segments.push(Segment { first_slot, members });
        first_slot += slots;
        previous = threshold;
    }
    segments
}

/// The distribution of a live endpoint list, swapped atomically on refresh.
#[derive(Debug)]
pub struct SharedDistribution {
    endpoints: Arc<EndpointList>,
    uniform: bool,
    current: ArcSwap<WeightDistribution>,
}

impl SharedDistribution {
    pub fn new(endpoints: Arc<EndpointList>, uniform: bool) -> Self {
        let initial = WeightDistribution::build(&endpoints.snapshot(), uniform);
        Self {
            endpoints,
            uniform,
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn endpoints(&self) -> &Arc<EndpointList> {
        &self.endpoints
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<WeightDistribution> {
        self.current.load_full()
    }

    /// Rebuild from the current membership and publish it.
    ///
    /// Same-generation refreshes keep the published distribution (and its rotation).
    pub fn refresh(&self) {
        let snapshot = self.endpoints.snapshot();
        let current = self.current.load();
        if current.generation() >= snapshot.generation() {
            return;
        }
        drop(current);

        let fresh = Arc::new(WeightDistribution::build(&snapshot, self.uniform));
        self.current.rcu(|published| {
            if published.generation() >= fresh.generation() {
                published.clone()
            } else {
                fresh.clone()
            }
        });

        tracing::debug!(
            generation = snapshot.generation(),
            endpoints = fresh.endpoints().len(),
            weight_sum = fresh.weight_sum(),
            "Weight distribution refreshed"
        );
    }
}
