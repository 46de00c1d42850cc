//! Per-request execution context.
//!
//! # Responsibilities
//! - Carry the routing-relevant view of a request (path, method, channel, entrypoint)
//! - Collect path parameters extracted by the matching flow selector
//! - Hold policy-set attributes (endpoint and method overrides)
//! - Memoize resolved flow sequences per resolver and phase
//!
//! # Design Decisions
//! - Exclusively owned by one request; no interior locking
//! - Request ID assigned at construction for log correlation
//! - Memo entries are keyed by resolver identity, so two resolvers over the
//!   same request never see each other's results

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use uuid::Uuid;

use crate::flow::model::{Flow, OperationMode};
use crate::flow::resolver::ResolverId;
use crate::invoker::cancel::CancelSignal;

/// Attribute naming an endpoint (or endpoint group) to target instead of the default group.
pub const ATTR_REQUEST_ENDPOINT: &str = "gateway.attribute.request.endpoint";

/// Attribute overriding the outbound HTTP method.
pub const ATTR_REQUEST_METHOD: &str = "gateway.attribute.request.method";

/// Execution phase in which flows are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Request,
    Response,
    MessageRequest,
    MessageResponse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response",
            Phase::MessageRequest => "message-request",
            Phase::MessageResponse => "message-response",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client-facing connector that received the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointConnector {
    /// Connector identifier (e.g. "http-proxy", "websocket").
    pub id: String,
    /// Operation modes the connector supports.
    pub modes: HashSet<OperationMode>,
}

impl EntrypointConnector {
    pub fn new(id: impl Into<String>, modes: impl IntoIterator<Item = OperationMode>) -> Self {
        Self {
            id: id.into(),
            modes: modes.into_iter().collect(),
        }
    }
}

/// Key of a memoized flow sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowCacheKey {
    pub resolver: ResolverId,
    pub phase: Phase,
}

/// Mutable state of one request while it is dispatched.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    api_id: String,
    path: String,
    path_info: String,
    query: Option<String>,
    method: Method,
    headers: HeaderMap,
    entrypoint: Option<EntrypointConnector>,
    channel: Option<String>,
    path_parameters: HashMap<String, String>,
    attributes: HashMap<String, String>,
    resolved_flows: HashMap<FlowCacheKey, Arc<[Arc<Flow>]>>,
    cancel: Option<CancelSignal>,
}

impl RequestContext {
    /// Create a context for a request on `api_id`. The path info starts equal to the path.
    pub fn new(api_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            request_id: Uuid::new_v4(),
            api_id: api_id.into(),
            path_info: path.clone(),
            path,
            query: None,
            method,
            headers: HeaderMap::new(),
            entrypoint: None,
            channel: None,
            path_parameters: HashMap::new(),
            attributes: HashMap::new(),
            resolved_flows: HashMap::new(),
            cancel: None,
        }
    }

    /// Strip the API context path from the path to obtain the path info.
    ///
    /// A context path that is not a prefix of the path leaves the path info untouched.
    pub fn with_context_path(mut self, context_path: &str) -> Self {
        let context_path = context_path.trim_end_matches('/');
        if let Some(rest) = self.path.strip_prefix(context_path) {
            if rest.is_empty() {
                self.path_info = "/".to_string();
            } else if rest.starts_with('/') {
                self.path_info = rest.to_string();
            }
        }
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: EntrypointConnector) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn entrypoint(&self) -> Option<&EntrypointConnector> {
        self.entrypoint.as_ref()
    }

    /// The channel target. Falls back to the path info when no channel was set.
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.path_info)
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }

    pub fn path_parameters(&self) -> &HashMap<String, String> {
        &self.path_parameters
    }

    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.path_parameters.get(name).map(String::as_str)
    }

    pub fn insert_path_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.path_parameters.insert(name.into(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// Previously resolved flows for this resolver and phase, if any.
    pub fn cached_flows(&self, key: &FlowCacheKey) -> Option<Arc<[Arc<Flow>]>> {
        self.resolved_flows.get(key).cloned()
    }

    /// Store the resolved flows for a resolver and phase.
    pub fn cache_flows(&mut self, key: FlowCacheKey, flows: Arc<[Arc<Flow>]>) {
        self.resolved_flows.insert(key, flows);
    }
}
