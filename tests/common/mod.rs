//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use gateway_dispatch::invoker::{
    BackendResponse, BodyError, BodyStream, Connection, Connector, ConnectorError, OutboundRequest,
};
use gateway_dispatch::load_balancer::{EndpointDefinition, EndpointGroup, LoadBalancerKind};

/// What a programmable connector does with one connection attempt.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Respond(u16),
    Refuse,
    /// Wait, then respond 200.
    Hang(Duration),
}

/// Connector driven by a closure of (request, zero-based call number).
pub struct ProgrammableConnector<F> {
    f: F,
    calls: AtomicU32,
    requests: Mutex<Vec<OutboundRequest>>,
    body: Arc<Mutex<Vec<u8>>>,
}

impl<F> ProgrammableConnector<F>
where
    F: Fn(&OutboundRequest, u32) -> Outcome + Send + Sync,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self {
            f,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            body: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Endpoint names of every connection attempt, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.endpoint.clone()).collect()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn body(&self) -> Vec<u8> {
        self.body.lock().unwrap().clone()
    }
}

impl<F> fmt::Debug for ProgrammableConnector<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgrammableConnector")
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl<F> Connector for ProgrammableConnector<F>
where
    F: Fn(&OutboundRequest, u32) -> Outcome + Send + Sync,
{
    fn connect<'a>(&'a self, request: OutboundRequest) -> BoxFuture<'a, Result<Connection, ConnectorError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.f)(&request, call);
        let endpoint = request.endpoint.clone();
        self.requests.lock().unwrap().push(request);
        let body = self.body.clone();

        async move {
            let status = match outcome {
                Outcome::Refuse => return Err(ConnectorError::Refused(endpoint)),
                Outcome::Respond(status) => status,
                Outcome::Hang(delay) => {
                    tokio::time::sleep(delay).await;
                    200
                }
            };
            let sink = futures_util::sink::unfold(body, |body, chunk: Bytes| async move {
                body.lock().unwrap().extend_from_slice(&chunk);
                Ok::<_, ConnectorError>(body)
            });
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            Ok(Connection {
                sink: Box::pin(sink),
                response: async move { Ok(BackendResponse::empty(status)) }.boxed(),
            })
        }
        .boxed()
    }
}

/// Connector answering 200 to everything.
pub fn ok_connector() -> Arc<ProgrammableConnector<impl Fn(&OutboundRequest, u32) -> Outcome + Send + Sync>> {
    ProgrammableConnector::new(|_, _| Outcome::Respond(200))
}

pub fn group(
    name: &str,
    kind: LoadBalancerKind,
    connector: Arc<dyn Connector>,
    endpoints: &[(&str, u32)],
) -> Arc<EndpointGroup> {
    EndpointGroup::new(
        name,
        kind,
        connector,
        endpoints
            .iter()
            .map(|(n, w)| EndpointDefinition::new(*n, format!("http://{n}:8080"), *w))
            .collect(),
    )
}

pub fn body(chunks: &[&'static str]) -> BodyStream {
    let chunks: Vec<Result<Bytes, BodyError>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
    Box::pin(futures_util::stream::iter(chunks))
}

pub fn empty_body() -> BodyStream {
    Box::pin(futures_util::stream::empty::<Result<Bytes, BodyError>>())
}
