//! Backend connector abstraction.
//!
//! # Responsibilities
//! - Open a connection to a resolved endpoint for one outbound request
//! - Expose the outbound body as a sink (its readiness is the backpressure signal)
//! - Deliver the backend response once the request body has been written
//!
//! # Design Decisions
//! - Transport is pluggable: the dispatch core only sees this trait
//! - A connection exists only once the transport accepted it, so no body
//!   chunk is pulled before there is somewhere to write it

use std::fmt;
use std::pin::Pin;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::Sink;
use thiserror::Error;

use crate::invoker::OutboundRequest;

/// Failure while reading a body stream.
#[derive(Debug, Error)]
#[error("body error: {0}")]
pub struct BodyError(pub String);

/// Request or response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, BodyError>>;

/// Outbound body writer of an open connection.
pub type BodySink = Pin<Box<dyn Sink<Bytes, Error = ConnectorError> + Send>>;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connection refused by {0}")]
    Refused(String),

    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Response of a backend.
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl BackendResponse {
    /// Response with an empty body.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Box::pin(futures_util::stream::empty::<Result<Bytes, BodyError>>()),
        }
    }
}

impl fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// An established connection: write the body, then await the response.
pub struct Connection {
    pub sink: BodySink,
    pub response: BoxFuture<'static, Result<BackendResponse, ConnectorError>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to backends.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a connection for `request`. Resolves once the connection is usable.
    fn connect<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Connection, ConnectorError>>;
}
