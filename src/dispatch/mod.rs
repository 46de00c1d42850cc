//! Dispatch runtime.
//!
//! # Responsibilities
//! - Turn a validated configuration into deployed flows and endpoint groups
//! - Build the per-API flow resolver and invoker chain
//! - Synchronise all of it on reload without disturbing unchanged endpoints
//!
//! # Data Flow
//! ```text
//! DispatchConfig
//!     → FlowStore::deploy (flows per API)
//!     → EndpointManager (deploy / update / undeploy groups → refresh)
//!     → DeployedApi { resolver: Conditional | BestMatch,
//!                     invoker: Failover(Endpoint(GroupEndpointResolver)) }
//!
//! Request:
//!     new_context → resolve_flows(phase) → invoke(body) → Invocation | DispatchError
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{Method, StatusCode};
use dashmap::DashMap;
use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::schema::{ApiConfig, DispatchConfig, FlowMode};
use crate::config::watcher::ConfigWatcher;
use crate::context::{Phase, RequestContext};
use crate::flow::model::Flow;
use crate::flow::resolver::{ConditionalFlowResolver, FlowResolver, Flows};
use crate::flow::selector::SelectorEvaluator;
use crate::flow::store::FlowStore;
use crate::flow::BestMatchFlowResolver;
use crate::invoker::connector::{BodyStream, Connector};
use crate::invoker::failover::{FailoverInvoker, FailoverOptions};
use crate::invoker::{EndpointInvoker, Invocation, InvokeError, Invoker};
use crate::load_balancer::group::{EndpointGroup, EndpointManager};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown API '{0}'")]
    UnknownApi(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownApi(_) => StatusCode::NOT_FOUND,
            Self::Invoke(e) => e.status(),
        }
    }
}

/// Outcome of [`DispatchRuntime::dispatch`].
#[derive(Debug)]
pub struct Dispatched {
    /// Flows that applied to the request phase.
    pub flows: Vec<Arc<Flow>>,
    pub invocation: Invocation,
}

/// Resolver and invoker of one deployed API.
struct DeployedApi {
    context_path: Option<String>,
    resolver: Box<dyn FlowResolver>,
    invoker: Box<dyn Invoker>,
}

/// Owns every deployed API and endpoint group.
pub struct DispatchRuntime {
    flows: Arc<FlowStore>,
    endpoints: Arc<EndpointManager>,
    connector: Arc<dyn Connector>,
    evaluator: SelectorEvaluator,
    apis: DashMap<String, Arc<DeployedApi>>,
}

impl DispatchRuntime {
    /// Empty runtime whose endpoints connect through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            flows: Arc::new(FlowStore::new()),
            endpoints: Arc::new(EndpointManager::new()),
            connector,
            evaluator: SelectorEvaluator::default(),
            apis: DashMap::new(),
        }
    }

    pub fn from_config(config: &DispatchConfig, connector: Arc<dyn Connector>) -> Self {
        let runtime = Self::new(connector);
        runtime.apply(config);
        runtime
    }

    pub fn flows(&self) -> &Arc<FlowStore> {
        &self.flows
    }

    pub fn endpoints(&self) -> &Arc<EndpointManager> {
        &self.endpoints
    }

    pub fn api_ids(&self) -> Vec<String> {
        self.apis.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Synchronise deployed state with `config`.
    pub fn apply(&self, config: &DispatchConfig) {
        for group_config in &config.endpoint_groups {
            match self.endpoints.group(&group_config.name) {
                Some(group) if group.kind() == group_config.load_balancer => {
                    group.update_endpoints(group_config.endpoints.clone());
                }
                _ => self.endpoints.deploy(EndpointGroup::new(
                    group_config.name.clone(),
                    group_config.load_balancer,
                    self.connector.clone(),
                    group_config.endpoints.clone(),
                )),
            }
        }
        for name in self.endpoints.group_names() {
            if !config.endpoint_groups.iter().any(|g| g.name == name) {
                self.endpoints.undeploy(&name);
            }
        }

        let options = config.failover.to_options();
        for api in &config.apis {
            self.flows.deploy(api.id.clone(), api.flows.iter().map(|f| f.to_flow()).collect());
            self.apis.insert(api.id.clone(), Arc::new(self.deploy_api(api, &options)));
        }
        for id in self.api_ids() {
            if !config.apis.iter().any(|a| a.id == id) {
                self.apis.remove(&id);
                self.flows.undeploy(&id);
                tracing::info!(api = %id, "API undeployed");
            }
        }

        tracing::info!(
            apis = config.apis.len(),
            endpoint_groups = config.endpoint_groups.len(),
            max_attempts = options.max_attempts,
            "Configuration applied"
        );
    }

    fn deploy_api(&self, api: &ApiConfig, options: &FailoverOptions) -> DeployedApi {
        let resolver: Box<dyn FlowResolver> = match api.flow_mode {
            FlowMode::Default => Box::new(ConditionalFlowResolver::new(self.flows.clone(), self.evaluator.clone())),
            FlowMode::BestMatch => Box::new(BestMatchFlowResolver::over(self.flows.clone(), self.evaluator.clone())),
        };

        let endpoint_resolver = self.endpoints.resolver(api.endpoint_group.clone());
        let endpoint_invoker = EndpointInvoker::new(api.id.clone(), endpoint_resolver);
        let invoker = FailoverInvoker::new(endpoint_invoker, options.clone());

        tracing::info!(
            api = %api.id,
            flows = api.flows.len(),
            flow_mode = ?api.flow_mode,
            endpoint_group = %api.endpoint_group,
            "API deployed"
        );
        DeployedApi {
            context_path: api.context_path.clone(),
            resolver,
            invoker: Box::new(invoker),
        }
    }

    fn api(&self, api_id: &str) -> Result<Arc<DeployedApi>, DispatchError> {
        self.apis
            .get(api_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::UnknownApi(api_id.to_string()))
    }

    /// A request context for `api_id`, with the API's context path applied.
    pub fn new_context(&self, api_id: &str, method: Method, path: &str) -> Result<RequestContext, DispatchError> {
        let api = self.api(api_id)?;
        let ctx = RequestContext::new(api_id, method, path);
        Ok(match &api.context_path {
            Some(context_path) => ctx.with_context_path(context_path),
            None => ctx,
        })
    }

    /// Flows of the request's API that apply in `phase`.
    pub fn resolve_flows(&self, ctx: &mut RequestContext, phase: Phase) -> Result<Flows, DispatchError> {
        let api = self.api(ctx.api_id())?;
        Ok(api.resolver.resolve(ctx, phase))
    }

    /// Forward the request to an endpoint of the API's group.
    pub async fn invoke(&self, ctx: &mut RequestContext, body: &mut BodyStream) -> Result<Invocation, DispatchError> {
        let api = self.api(ctx.api_id())?;
        let started = Instant::now();
        let result = api.invoker.invoke(ctx, body).await;

        let status = match &result {
            Ok(invocation) => invocation.response.status,
            Err(e) => e.status(),
        };
        metrics::record_invocation(status.as_u16(), started.elapsed());
        match &result {
            Ok(invocation) => tracing::debug!(
                request_id = %ctx.request_id(),
                api = %ctx.api_id(),
                endpoint = %invocation.endpoint.name(),
                attempts = invocation.attempts,
                status = %status,
                "Request dispatched"
            ),
            Err(e) => tracing::warn!(
                request_id = %ctx.request_id(),
                api = %ctx.api_id(),
                error = %e,
                status = %status,
                "Request dispatch failed"
            ),
        }
        result.map_err(DispatchError::from)
    }

    /// Resolve the request-phase flows, then invoke.
    pub async fn dispatch(&self, ctx: &mut RequestContext, body: &mut BodyStream) -> Result<Dispatched, DispatchError> {
        let flows: Vec<Arc<Flow>> = self.resolve_flows(ctx, Phase::Request)?.collect();
        let invocation = self.invoke(ctx, body).await?;
        Ok(Dispatched { flows, invocation })
    }

    /// Apply every valid change of the file at `path` until the returned watcher is dropped.
    pub fn watch(self: &Arc<Self>, path: &Path) -> Result<(RecommendedWatcher, JoinHandle<()>), notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let handle = watcher.run()?;

        let runtime = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                runtime.apply(&config);
            }
        });
        Ok((handle, task))
    }
}
