//! Flow resolution subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming RequestContext (api, path info, method, channel, entrypoint)
//!     → store.rs (candidate flows of the API)
//!     → selector.rs (evaluate each flow's selectors)
//!         → pattern.rs (compiled path/channel templates, cached)
//!     → params.rs (path parameters of the accepted HTTP selector)
//!     → resolver.rs (ordered accepted flows, memoized per phase)
//!     → best_match.rs (optional: keep the most specific flow)
//!     → Return: Flows (possibly empty = no route)
//! ```
//!
//! # Design Decisions
//! - Flow definitions are immutable at runtime and shared via `Arc`
//! - Selectors are a closed enum, evaluated exhaustively
//! - A bad template only disables its own flow
//! - No match is a normal outcome, not an error

pub mod best_match;
pub mod model;
pub mod params;
pub mod pattern;
pub mod resolver;
pub mod selector;
pub mod store;

pub use best_match::BestMatchFlowResolver;
pub use model::{
    ChannelSelector, Flow, FlowSteps, HttpMethod, HttpSelector, OperationMode, Operator, PolicyStep, Selector,
};
pub use pattern::{PathPattern, PathPatternCache};
pub use resolver::{ConditionalFlowResolver, FlowList, FlowResolver, FlowSource, Flows, ResolverId};
pub use selector::SelectorEvaluator;
pub use store::FlowStore;
