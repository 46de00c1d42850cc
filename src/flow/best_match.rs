//! Best-match flow narrowing.
//!
//! # Responsibilities
//! - Materialize the flows accepted by a base resolver
//! - Keep the single most path-specific one
//! - Extract path parameters for that flow only
//!
//! # Design Decisions
//! - Specificity = (concrete leading segments, template length), compared in that order
//! - Flows without an HTTP selector are never chosen
//! - Ties keep the first flow in definition order
//! - No candidate = empty sequence, not an error

use std::sync::Arc;

use crate::context::{FlowCacheKey, Phase, RequestContext};
use crate::flow::model::{Flow, HttpSelector};
use crate::flow::params::PathParameterExtractor;
use crate::flow::resolver::{ConditionalFlowResolver, FlowResolver, FlowSource, Flows, ResolverId};
use crate::flow::selector::SelectorEvaluator;
use crate::observability::metrics;

/// Narrows a base resolver's output to zero or one flow.
#[derive(Debug)]
pub struct BestMatchFlowResolver<R> {
    id: ResolverId,
    base: R,
    extractor: PathParameterExtractor,
}

impl<R: FlowResolver> BestMatchFlowResolver<R> {
    /// Wrap `base`. The base should not extract parameters itself, see [`Self::over`].
    pub fn new(base: R) -> Self {
        Self {
            id: ResolverId::new(),
            base,
            extractor: PathParameterExtractor::new(),
        }
    }
}

impl<S: FlowSource> BestMatchFlowResolver<ConditionalFlowResolver<S>> {
    /// Best match over the flows of `source`.
    pub fn over(source: S, evaluator: SelectorEvaluator) -> Self {
        Self::new(ConditionalFlowResolver::new(source, evaluator).without_parameter_extraction())
    }
}

impl<R: FlowResolver> FlowResolver for BestMatchFlowResolver<R> {
    fn id(&self) -> ResolverId {
        self.id
    }

    fn resolve(&self, ctx: &mut RequestContext, phase: Phase) -> Flows {
        let key = FlowCacheKey { resolver: self.id, phase };
        if let Some(flows) = ctx.cached_flows(&key) {
            return Flows::new(flows);
        }

        let candidates: Vec<Arc<Flow>> = self.base.resolve(ctx, phase).collect();
        let best = select_best(&candidates);

        let flows: Arc<[Arc<Flow>]> = match best {
            Some(flow) => {
                self.extractor.extract(ctx, flow.http_selector());
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    api = %ctx.api_id(),
                    phase = %phase,
                    flow = %flow.id(),
                    candidates = candidates.len(),
                    "Best matching flow selected"
                );
                Arc::from(vec![flow.clone()])
            }
            None => Arc::from(Vec::new()),
        };
        metrics::record_flows_resolved(ctx.api_id(), "best-match", flows.len());

        ctx.cache_flows(key, flows.clone());
        Flows::new(flows)
    }
}

/// Specificity of an HTTP selector path.
fn specificity(selector: &HttpSelector) -> (usize, usize) {
    let concrete = selector
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .take_while(|segment| !segment.starts_with(':'))
        .count();
    (concrete, selector.path.len())
}

fn select_best(candidates: &[Arc<Flow>]) -> Option<&Arc<Flow>> {
    let mut best: Option<(&Arc<Flow>, (usize, usize))> = None;
    for flow in candidates {
        let Some(selector) = flow.http_selector() else {
            continue;
        };
        let score = specificity(selector);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((flow, score));
        }
    }
    best.map(|(flow, _)| flow)
}
