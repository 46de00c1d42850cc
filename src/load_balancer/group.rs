//! Endpoint group management.
//!
//! # Responsibilities
//! - Own the endpoints and the load balancer of each group
//! - Refresh the load balancer after every membership change
//! - Resolve an endpoint for a request (default group or target override)

use std::sync::Arc;

use dashmap::DashMap;

use crate::invoker::connector::Connector;
use crate::invoker::EndpointResolver;
use crate::load_balancer::endpoint::{EndpointDefinition, EndpointList, EndpointSnapshot, ManagedEndpoint};
use crate::load_balancer::{LoadBalancer, LoadBalancerKind};
use crate::observability::metrics;

/// A named pool of endpoints behind one load balancer.
#[derive(Debug)]
pub struct EndpointGroup {
    name: String,
    kind: LoadBalancerKind,
    connector: Arc<dyn Connector>,
    endpoints: Arc<EndpointList>,
    load_balancer: Box<dyn LoadBalancer>,
}

impl EndpointGroup {
    /// Create a group whose endpoints connect through `connector`.
    pub fn new(
        name: impl Into<String>,
        kind: LoadBalancerKind,
        connector: Arc<dyn Connector>,
        definitions: Vec<EndpointDefinition>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|group| {
            let endpoints = definitions
                .into_iter()
                .map(|def| Arc::new(ManagedEndpoint::with_group(def, connector.clone(), group.clone())))
                .collect();
            let endpoints = Arc::new(EndpointList::new(endpoints));
            let load_balancer = kind.build(endpoints.clone());
            Self {
                name,
                kind,
                connector,
                endpoints,
                load_balancer,
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LoadBalancerKind {
        self.kind
    }

    pub fn load_balancer(&self) -> &dyn LoadBalancer {
        self.load_balancer.as_ref()
    }

    /// Current membership.
    pub fn endpoints(&self) -> Arc<EndpointSnapshot> {
        self.endpoints.snapshot()
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<ManagedEndpoint>> {
        self.endpoints
            .snapshot()
            .endpoints()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Select an endpoint through the group's load balancer.
    pub fn next(&self) -> Option<Arc<ManagedEndpoint>> {
        match self.load_balancer.next() {
            Some(endpoint) => {
                metrics::record_endpoint_selected(&self.name);
                Some(endpoint)
            }
            None => {
                tracing::debug!(
                    group = %self.name,
                    endpoints = self.endpoints.len(),
                    "No endpoint with weight in group"
                );
                None
            }
        }
    }

    /// Add an endpoint and refresh the load balancer.
    pub fn add_endpoint(self: &Arc<Self>, definition: EndpointDefinition) {
        tracing::info!(group = %self.name, endpoint = %definition.name, weight = definition.weight, "Endpoint added");
        self.endpoints.push(self.managed(definition));
        self.load_balancer.refresh();
    }

    /// Remove an endpoint and refresh the load balancer. Returns true if it existed.
    pub fn remove_endpoint(&self, name: &str) -> bool {
        let removed = self.endpoints.remove(name);
        if removed {
            tracing::info!(group = %self.name, endpoint = %name, "Endpoint removed");
            self.load_balancer.refresh();
        }
        removed
    }

    /// Replace the membership with `definitions`.
    ///
    /// Endpoints whose definition is unchanged are kept, with their health state.
    pub fn update_endpoints(self: &Arc<Self>, definitions: Vec<EndpointDefinition>) {
        let current = self.endpoints.snapshot();
        let next: Vec<Arc<ManagedEndpoint>> = definitions
            .into_iter()
            .map(|def| {
                current
                    .endpoints()
                    .iter()
                    .find(|e| e.definition() == &def)
                    .cloned()
                    .unwrap_or_else(|| self.managed(def))
            })
            .collect();

        tracing::info!(group = %self.name, endpoints = next.len(), "Endpoint group updated");
        self.endpoints.replace(next);
        self.load_balancer.refresh();
    }

    fn managed(self: &Arc<Self>, definition: EndpointDefinition) -> Arc<ManagedEndpoint> {
        Arc::new(ManagedEndpoint::with_group(
            definition,
            self.connector.clone(),
            Arc::downgrade(self),
        ))
    }
}

/// Registry of deployed endpoint groups.
#[derive(Debug, Default)]
pub struct EndpointManager {
    groups: DashMap<String, Arc<EndpointGroup>>,
}

impl EndpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a group, replacing any group with the same name.
    pub fn deploy(&self, group: Arc<EndpointGroup>) {
        tracing::info!(
            group = %group.name(),
            load_balancer = group.kind().as_str(),
            endpoints = group.endpoints().endpoints().len(),
            "Endpoint group deployed"
        );
        self.groups.insert(group.name().to_string(), group);
    }

    /// Undeploy a group. Returns true if it was deployed.
    pub fn undeploy(&self, name: &str) -> bool {
        let removed = self.groups.remove(name).is_some();
        if removed {
            tracing::info!(group = %name, "Endpoint group undeployed");
        }
        removed
    }

    pub fn group(&self, name: &str) -> Option<Arc<EndpointGroup>> {
        self.groups.get(name).map(|entry| entry.value().clone())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Find an endpoint by name across all groups.
    pub fn find_endpoint(&self, name: &str) -> Option<Arc<ManagedEndpoint>> {
        self.groups.iter().find_map(|entry| entry.value().endpoint(name))
    }

    /// A resolver defaulting to `default_group`.
    pub fn resolver(self: &Arc<Self>, default_group: impl Into<String>) -> GroupEndpointResolver {
        GroupEndpointResolver {
            manager: self.clone(),
            default_group: default_group.into(),
        }
    }
}

/// Resolves endpoints from the groups of an [`EndpointManager`].
///
/// A target override names an endpoint first, then a group.
#[derive(Debug, Clone)]
pub struct GroupEndpointResolver {
    manager: Arc<EndpointManager>,
    default_group: String,
}

impl GroupEndpointResolver {
    pub fn default_group(&self) -> &str {
        &self.default_group
    }
}

impl EndpointResolver for GroupEndpointResolver {
    fn resolve(&self, target_override: Option<&str>) -> Option<Arc<ManagedEndpoint>> {
        match target_override {
            Some(target) => {
                let resolved = self
                    .manager
                    .find_endpoint(target)
                    .or_else(|| self.manager.group(target).and_then(|g| g.next()));
                if resolved.is_none() {
                    tracing::debug!(target = %target, "Target override matches no endpoint or group");
                }
                resolved
            }
            None => match self.manager.group(&self.default_group) {
                Some(group) => group.next(),
                None => {
                    tracing::debug!(group = %self.default_group, "Group not found in EndpointManager");
                    None
                }
            },
        }
    }
}
