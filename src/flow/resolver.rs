//! Flow resolution.
//!
//! # Responsibilities
//! - Pull candidate flows for the request's API from a [`FlowSource`]
//! - Keep the flows whose selectors accept the request, in source order
//! - Extract path parameters of accepted HTTP selectors
//! - Memoize the result per resolver and phase on the request context
//!
//! # Design Decisions
//! - The sequence is realized once per phase; later calls replay it without
//!   touching the source or the selectors again
//! - Disabled flows are skipped before selector evaluation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::{FlowCacheKey, Phase, RequestContext};
use crate::flow::model::Flow;
use crate::flow::params::PathParameterExtractor;
use crate::flow::selector::SelectorEvaluator;
use crate::observability::metrics;

static RESOLVER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a resolver instance, used to key memoized results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolverId(u64);

impl ResolverId {
    /// Generate a new unique resolver ID.
    pub fn new() -> Self {
        Self(RESOLVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ResolverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, immutable list of flows.
pub type FlowList = Arc<Vec<Arc<Flow>>>;

/// Supplies the candidate flows of an API.
pub trait FlowSource: Send + Sync {
    /// Flows defined for `api_id`, in definition order. Unknown APIs have none.
    fn flows_for(&self, api_id: &str) -> FlowList;
}

impl<S: FlowSource + ?Sized> FlowSource for Arc<S> {
    fn flows_for(&self, api_id: &str) -> FlowList {
        (**self).flows_for(api_id)
    }
}

/// Single-pass sequence of resolved flows.
#[derive(Debug, Clone)]
pub struct Flows {
    flows: Arc<[Arc<Flow>]>,
    next: usize,
}

impl Flows {
    pub fn new(flows: Arc<[Arc<Flow>]>) -> Self {
        Self { flows, next: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()))
    }
}

impl Iterator for Flows {
    type Item = Arc<Flow>;

    fn next(&mut self) -> Option<Self::Item> {
        let flow = self.flows.get(self.next)?.clone();
        self.next += 1;
        Some(flow)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.flows.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Flows {}

/// Produces the flows that apply to a request.
pub trait FlowResolver: Send + Sync {
    fn id(&self) -> ResolverId;

    /// Resolve the flows for `phase`. Resolution runs at most once per request and phase.
    fn resolve(&self, ctx: &mut RequestContext, phase: Phase) -> Flows;
}

/// Keeps every candidate flow whose selectors accept the request.
#[derive(Debug)]
pub struct ConditionalFlowResolver<S> {
    id: ResolverId,
    source: S,
    evaluator: SelectorEvaluator,
    extractor: PathParameterExtractor,
    extract_parameters: bool,
}

impl<S: FlowSource> ConditionalFlowResolver<S> {
    pub fn new(source: S, evaluator: SelectorEvaluator) -> Self {
        Self {
            id: ResolverId::new(),
            source,
            evaluator,
            extractor: PathParameterExtractor::new(),
            extract_parameters: true,
        }
    }

    /// Leave path parameters to a wrapping resolver.
    pub fn without_parameter_extraction(mut self) -> Self {
        self.extract_parameters = false;
        self
    }
}

impl<S: FlowSource> FlowResolver for ConditionalFlowResolver<S> {
    fn id(&self) -> ResolverId {
        self.id
    }

    fn resolve(&self, ctx: &mut RequestContext, phase: Phase) -> Flows {
        let key = FlowCacheKey { resolver: self.id, phase };
        if let Some(flows) = ctx.cached_flows(&key) {
            return Flows::new(flows);
        }

        let candidates = self.source.flows_for(ctx.api_id());
        let mut accepted = Vec::new();
        for flow in candidates.iter().filter(|f| f.is_enabled()) {
            if !self.evaluator.accepts_flow(ctx, flow) {
                continue;
            }
            if self.extract_parameters {
                self.extractor.extract(ctx, flow.http_selector());
            }
            accepted.push(flow.clone());
        }

        tracing::debug!(
            request_id = %ctx.request_id(),
            api = %ctx.api_id(),
            phase = %phase,
            candidates = candidates.len(),
            accepted = accepted.len(),
            "Flows resolved"
        );
        metrics::record_flows_resolved(ctx.api_id(), "conditional", accepted.len());

        let flows: Arc<[Arc<Flow>]> = Arc::from(accepted);
        ctx.cache_flows(key, flows.clone());
        Flows::new(flows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::{HttpSelector, Operator, Selector};
    use axum::http::Method;
    use std::sync::atomic::AtomicUsize;

    /// Counts how often flows are pulled.
    struct CountingSource {
        flows: FlowList,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new(flows: Vec<Flow>) -> Self {
            Self {
                flows: Arc::new(flows.into_iter().map(Arc::new).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FlowSource for CountingSource {
        fn flows_for(&self, _api_id: &str) -> FlowList {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.flows.clone()
        }
    }

    fn http_flow(id: &str, path: &str, operator: Operator) -> Flow {
        Flow::new(id).with_selector(Selector::Http(HttpSelector::new(path, operator)))
    }

    fn ids(flows: Flows) -> Vec<String> {
        flows.map(|f| f.id().to_string()).collect()
    }

    #[test]
    fn test_resolve_keeps_source_order() {
        let source = Arc::new(CountingSource::new(vec![
            http_flow("all", "/", Operator::StartsWith),
            http_flow("orders", "/orders", Operator::StartsWith),
            http_flow("users", "/users", Operator::StartsWith),
            Flow::new("no-selector"),
        ]));
        let resolver = ConditionalFlowResolver::new(source, SelectorEvaluator::default());
        let mut ctx = RequestContext::new("api", Method::GET, "/orders/1");

        assert_eq!(ids(resolver.resolve(&mut ctx, Phase::Request)), vec!["all", "orders", "no-selector"]);
    }

    #[test]
    fn test_resolve_memoized_per_phase() {
        let source = Arc::new(CountingSource::new(vec![http_flow("orders", "/orders", Operator::StartsWith)]));
        let resolver = ConditionalFlowResolver::new(source.clone(), SelectorEvaluator::default());
        let mut ctx = RequestContext::new("api", Method::GET, "/orders");

        assert_eq!(resolver.resolve(&mut ctx, Phase::Request).len(), 1);
        assert_eq!(resolver.resolve(&mut ctx, Phase::Request).len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        resolver.resolve(&mut ctx, Phase::Response);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // A second resolver over the same request has its own memo entry
        let other = ConditionalFlowResolver::new(source.clone(), SelectorEvaluator::default());
        other.resolve(&mut ctx, Phase::Request);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disabled_flows_skipped() {
        let source = CountingSource::new(vec![
            http_flow("off", "/", Operator::StartsWith).with_enabled(false),
            http_flow("on", "/", Operator::StartsWith),
        ]);
        let resolver = ConditionalFlowResolver::new(source, SelectorEvaluator::default());
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        assert_eq!(ids(resolver.resolve(&mut ctx, Phase::Request)), vec!["on"]);
    }

    #[test]
    fn test_parameters_extracted_for_accepted_flows_only() {
        let source = CountingSource::new(vec![
            http_flow("orders", "/orders/:order", Operator::StartsWith),
            http_flow("users", "/users/:user", Operator::StartsWith),
        ]);
        let resolver = ConditionalFlowResolver::new(source, SelectorEvaluator::default());
        let mut ctx = RequestContext::new("api", Method::GET, "/orders/17");

        resolver.resolve(&mut ctx, Phase::Request);
        assert_eq!(ctx.path_parameter("order"), Some("17"));
        assert_eq!(ctx.path_parameter("user"), None);
    }

    #[test]
    fn test_parameter_extraction_can_be_disabled() {
        let source = CountingSource::new(vec![http_flow("orders", "/orders/:order", Operator::StartsWith)]);
        let resolver =
            ConditionalFlowResolver::new(source, SelectorEvaluator::default()).without_parameter_extraction();
        let mut ctx = RequestContext::new("api", Method::GET, "/orders/17");

        assert_eq!(resolver.resolve(&mut ctx, Phase::Request).len(), 1);
        assert!(ctx.path_parameters().is_empty());
    }

    #[test]
    fn test_no_match_is_empty() {
        let source = CountingSource::new(vec![http_flow("orders", "/orders", Operator::Equals)]);
        let resolver = ConditionalFlowResolver::new(source, SelectorEvaluator::default());
        let mut ctx = RequestContext::new("api", Method::GET, "/users");

        assert_eq!(resolver.resolve(&mut ctx, Phase::Request).next(), None);
    }
}
