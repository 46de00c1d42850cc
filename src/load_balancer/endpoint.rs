//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend target of an endpoint group
//! - Hold the connector used to open connections to it
//! - Expose availability as reported by health checking
//! - Keep the group's membership as an atomically replaced snapshot

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::invoker::connector::Connector;
use crate::load_balancer::group::EndpointGroup;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Static definition of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointDefinition {
    /// Unique endpoint name within its group.
    pub name: String,
    /// Base URL requests are forwarded to (e.g. "http://10.0.0.1:8080/api").
    pub target: String,
    /// Weight for weighted load balancing (default: 1). Zero = never selected.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl EndpointDefinition {
    pub fn new(name: impl Into<String>, target: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            weight,
        }
    }
}

/// A load-balancer-visible handle to one backend target.
///
/// Immutable apart from its health state: an update replaces the endpoint.
#[derive(Debug)]
pub struct ManagedEndpoint {
    definition: EndpointDefinition,
    group: Weak<EndpointGroup>,
    connector: Arc<dyn Connector>,
    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
}

impl ManagedEndpoint {
    /// Create an endpoint that does not belong to a group.
    pub fn new(definition: EndpointDefinition, connector: Arc<dyn Connector>) -> Self {
        Self::with_group(definition, connector, Weak::new())
    }

    pub(crate) fn with_group(
        definition: EndpointDefinition,
        connector: Arc<dyn Connector>,
        group: Weak<EndpointGroup>,
    ) -> Self {
        Self {
            definition,
            group,
            connector,
            state: AtomicU8::new(HealthState::Unknown as u8),
        }
    }

    pub fn definition(&self) -> &EndpointDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn target(&self) -> &str {
        &self.definition.target
    }

    pub fn weight(&self) -> u32 {
        self.definition.weight
    }

    /// The owning group, if it is still deployed.
    pub fn group(&self) -> Option<Arc<EndpointGroup>> {
        self.group.upgrade()
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if endpoint is considered available (Healthy or Unknown).
    pub fn available(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Record the state reported by health checking.
    pub fn set_health(&self, state: HealthState) {
        let previous = HealthState::from(self.state.swap(state as u8, Ordering::Relaxed));
        if previous != state {
            tracing::info!(endpoint = %self.name(), from = ?previous, to = ?state, "Endpoint health changed");
        }
    }
}

/// One version of a group's membership.
#[derive(Debug, Default)]
pub struct EndpointSnapshot {
    generation: u64,
    endpoints: Vec<Arc<ManagedEndpoint>>,
}

impl EndpointSnapshot {
    /// Monotonic version, bumped by every membership change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoints(&self) -> &[Arc<ManagedEndpoint>] {
        &self.endpoints
    }
}

/// Ordered endpoint membership, replaced as a whole on every change.
#[derive(Debug, Default)]
pub struct EndpointList {
    current: ArcSwap<EndpointSnapshot>,
}

impl EndpointList {
    pub fn new(endpoints: Vec<Arc<ManagedEndpoint>>) -> Self {
        Self {
            current: ArcSwap::from_pointee(EndpointSnapshot {
                generation: 0,
                endpoints,
            }),
        }
    }

    /// Current membership.
    pub fn snapshot(&self) -> Arc<EndpointSnapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an endpoint.
    pub fn push(&self, endpoint: Arc<ManagedEndpoint>) {
        self.update(|endpoints| {
            let mut next = endpoints.to_vec();
            next.push(endpoint.clone());
            next
        });
    }

    /// Remove the endpoint named `name`. Returns true if one was removed.
    pub fn remove(&self, name: &str) -> bool {
        let previous = self.update(|endpoints| {
            endpoints
                .iter()
                .filter(|e| e.name() != name)
                .cloned()
                .collect()
        });
        previous.endpoints.iter().any(|e| e.name() == name)
    }

    /// Replace the whole membership.
    pub fn replace(&self, endpoints: Vec<Arc<ManagedEndpoint>>) {
        self.update(|_| endpoints.clone());
    }

    /// Apply `f` to the current membership; returns the snapshot it replaced.
    fn update<F>(&self, mut f: F) -> Arc<EndpointSnapshot>
    where
        F: FnMut(&[Arc<ManagedEndpoint>]) -> Vec<Arc<ManagedEndpoint>>,
    {
        self.current.rcu(|current| EndpointSnapshot {
            generation: current.generation + 1,
            endpoints: f(&current.endpoints),
        })
    }
}
