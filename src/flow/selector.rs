//! Selector evaluation.
//!
//! # Responsibilities
//! - Http: method AND path template
//! - Channel: channel template AND entrypoint id AND operation mode
//! - Combine a flow's selectors with AND semantics
//!
//! # Design Decisions
//! - Empty set = always matches (wildcard)
//! - No selector of a kind = that kind always matches
//! - Entrypoint/mode checks are skipped when no entrypoint is attached
//! - Pure predicate: safe to call concurrently on shared flows

use std::sync::Arc;

use crate::context::RequestContext;
use crate::flow::model::{ChannelSelector, Flow, HttpSelector, Selector};
use crate::flow::pattern::PathPatternCache;

/// Decides whether selectors accept a request.
#[derive(Debug, Clone, Default)]
pub struct SelectorEvaluator {
    patterns: Arc<PathPatternCache>,
}

impl SelectorEvaluator {
    pub fn new(patterns: Arc<PathPatternCache>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &Arc<PathPatternCache> {
        &self.patterns
    }

    /// Returns true if `selector` accepts the request.
    pub fn accepts(&self, ctx: &RequestContext, selector: &Selector) -> bool {
        match selector {
            Selector::Http(http) => self.accepts_http(ctx, http),
            Selector::Channel(channel) => self.accepts_channel(ctx, channel),
        }
    }

    /// Returns true if every selector of `flow` accepts the request.
    pub fn accepts_flow(&self, ctx: &RequestContext, flow: &Flow) -> bool {
        flow.selectors().iter().all(|s| self.accepts(ctx, s))
    }

    fn accepts_http(&self, ctx: &RequestContext, selector: &HttpSelector) -> bool {
        let method_ok = selector.methods.is_empty()
            || selector.methods.iter().any(|m| m.matches(ctx.method()));
        if !method_ok {
            return false;
        }

        self.patterns
            .get_or_create(&selector.path)
            .matches(ctx.path_info(), selector.path_operator)
    }

    fn accepts_channel(&self, ctx: &RequestContext, selector: &ChannelSelector) -> bool {
        let channel_ok = self
            .patterns
            .get_or_create(&selector.channel)
            .matches(ctx.channel(), selector.channel_operator);
        if !channel_ok {
            return false;
        }

        match ctx.entrypoint() {
            Some(entrypoint) => {
                let entrypoint_ok = selector.entrypoints.is_empty()
                    || selector.entrypoints.contains(&entrypoint.id);
                let mode_ok = selector.operations.is_empty()
                    || selector.operations.iter().any(|m| entrypoint.modes.contains(m));
                entrypoint_ok && mode_ok
            }
            None => true,
        }
    }
}
