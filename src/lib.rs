//! API gateway dispatch core.
//!
//! # Architecture Overview
//!
//! ```text
//!     RequestContext (context)
//!         │
//!         ▼
//!     ┌──────────────────────┐     ┌──────────────────────────┐
//!     │ flow                 │     │ load_balancer            │
//!     │  selector + pattern  │     │  group → strategy        │
//!     │  resolver/best_match │     │  distribution snapshot   │
//!     │  params              │     └────────────▲─────────────┘
//!     └──────────┬───────────┘                  │
//!                ▼                              │
//!     ┌──────────────────────┐   resolve     ┌──┴───────────────┐
//!     │ invoker              │──────────────▶│ EndpointResolver │
//!     │  failover → endpoint │               └──────────────────┘
//!     │  → connector         │
//!     └──────────────────────┘
//!
//!     dispatch: config → deployed APIs, flows and endpoint groups
//!     config / observability / resilience: cross-cutting
//! ```

// Core subsystems
pub mod context;
pub mod flow;
pub mod invoker;
pub mod load_balancer;

// Wiring
pub mod config;
pub mod dispatch;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;

pub use config::DispatchConfig;
pub use context::{Phase, RequestContext};
pub use dispatch::{DispatchError, DispatchRuntime};
pub use invoker::{Invocation, InvokeError, Invoker};
