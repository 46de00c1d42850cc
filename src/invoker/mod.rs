//! Backend invocation subsystem.
//!
//! # Data Flow
//! ```text
//! FailoverInvoker (failover.rs)
//!     attempt 1..=max_attempts within retry_timeout
//!         → EndpointInvoker (endpoint.rs)
//!             → EndpointResolver::resolve(target override)   NoEndpoint → 503
//!             → ManagedEndpoint::available()                  Unavailable → 503
//!             → OutboundRequest (method override, URL rewrite) Malformed → 400
//!             → Connector::connect (connector.rs)             Connection → 502, retried
//!             → relay body into the connection sink (backpressure)
//!             → await BackendResponse
//! ```
//!
//! # Design Decisions
//! - The inbound body is pulled only after a connection is established
//! - A failed connect leaves the body untouched, so the next attempt can send it
//! - Failures after the body was written are not retried
//! - Every failure maps to a well-defined status code

pub mod cancel;
pub mod connector;
pub mod endpoint;
pub mod failover;

use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use futures_util::future::BoxFuture;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::load_balancer::endpoint::ManagedEndpoint;

pub use cancel::{CancelSignal, Cancellation};
pub use connector::{BackendResponse, BodyError, BodyStream, Connection, Connector, ConnectorError};
pub use endpoint::EndpointInvoker;
pub use failover::{FailoverInvoker, FailoverOptions};

/// Picks the endpoint an invocation attempt goes to.
pub trait EndpointResolver: Send + Sync {
    /// Resolve `target_override` (an endpoint or group name), or the default group when absent.
    fn resolve(&self, target_override: Option<&str>) -> Option<Arc<ManagedEndpoint>>;
}

impl<R: EndpointResolver + ?Sized> EndpointResolver for Arc<R> {
    fn resolve(&self, target_override: Option<&str>) -> Option<Arc<ManagedEndpoint>> {
        (**self).resolve(target_override)
    }
}

/// Request handed to a connector.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub request_id: Uuid,
    /// Name of the endpoint the request goes to.
    pub endpoint: String,
}

/// Successful outcome of an invocation.
#[derive(Debug)]
pub struct Invocation {
    pub endpoint: Arc<ManagedEndpoint>,
    pub response: BackendResponse,
    pub bytes_sent: u64,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("no endpoint available")]
    NoEndpoint,

    #[error("endpoint {0} is unavailable")]
    EndpointUnavailable(String),

    #[error("malformed outbound request: {0}")]
    MalformedRequest(String),

    #[error("connection to endpoint {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: ConnectorError,
    },

    #[error("invocation timed out")]
    Timeout,

    #[error("endpoint {endpoint} failed after connecting: {source}")]
    Upstream {
        endpoint: String,
        #[source]
        source: ConnectorError,
    },

    #[error("inbound request body failed: {0}")]
    Body(#[from] BodyError),

    #[error("invocation cancelled")]
    Cancelled,
}

impl InvokeError {
    /// Status code returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoEndpoint | Self::EndpointUnavailable(_) | Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::MalformedRequest(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Connection { .. } | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// True if another attempt (with a fresh endpoint resolution) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoEndpoint | Self::EndpointUnavailable(_) | Self::Connection { .. }
        )
    }
}

/// Issues a request to a backend endpoint.
pub trait Invoker: Send + Sync {
    fn id(&self) -> &str;

    /// Invoke a backend for `ctx`, streaming `body` to it.
    fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        body: &'a mut BodyStream,
    ) -> BoxFuture<'a, Result<Invocation, InvokeError>>;
}

impl<I: Invoker + ?Sized> Invoker for Arc<I> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        body: &'a mut BodyStream,
    ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
        (**self).invoke(ctx, body)
    }
}

impl<I: Invoker + ?Sized> Invoker for Box<I> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        body: &'a mut BodyStream,
    ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
        (**self).invoke(ctx, body)
    }
}
