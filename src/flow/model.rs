//! Flow and selector definitions.
//!
//! Flows are immutable once built and shared via `Arc` between requests.

use std::collections::HashSet;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::context::Phase;

/// How a selector template is compared with the request value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    /// The template must match the whole value.
    Equals,
    /// The template must match a prefix of the value.
    #[default]
    StartsWith,
}

/// HTTP methods a selector can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Returns true if `method` is this method. Extension methods never match.
    pub fn matches(&self, method: &Method) -> bool {
        method.as_str() == self.as_str()
    }
}

/// Operation modes of message-oriented APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    RequestResponse,
    Publish,
    Subscribe,
}

/// Restricts a flow by request path and method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSelector {
    /// Path template, `:name` segments capture one path segment.
    pub path: String,
    pub path_operator: Operator,
    /// Accepted methods. Empty = any method.
    pub methods: HashSet<HttpMethod>,
}

impl Default for HttpSelector {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            path_operator: Operator::StartsWith,
            methods: HashSet::new(),
        }
    }
}

impl HttpSelector {
    pub fn new(path: impl Into<String>, path_operator: Operator) -> Self {
        Self {
            path: path.into(),
            path_operator,
            methods: HashSet::new(),
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }
}

/// Restricts a flow by channel, entrypoint and operation mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelSelector {
    pub channel: String,
    pub channel_operator: Operator,
    /// Accepted entrypoint connector ids. Empty = any entrypoint.
    pub entrypoints: HashSet<String>,
    /// Accepted operation modes. Empty = any mode.
    pub operations: HashSet<OperationMode>,
}

impl Default for ChannelSelector {
    fn default() -> Self {
        Self {
            channel: "/".to_string(),
            channel_operator: Operator::StartsWith,
            entrypoints: HashSet::new(),
            operations: HashSet::new(),
        }
    }
}

impl ChannelSelector {
    pub fn new(channel: impl Into<String>, channel_operator: Operator) -> Self {
        Self {
            channel: channel.into(),
            channel_operator,
            ..Self::default()
        }
    }

    pub fn with_entrypoints<I, S>(mut self, entrypoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoints = entrypoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operations(mut self, operations: impl IntoIterator<Item = OperationMode>) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }
}

/// A predicate restricting which requests a flow applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Http(HttpSelector),
    Channel(ChannelSelector),
}

impl Selector {
    fn same_kind(&self, other: &Selector) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One policy invocation inside a flow. Opaque to dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PolicyStep {
    #[serde(default)]
    pub name: Option<String>,
    pub policy: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl PolicyStep {
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            name: None,
            policy: policy.into(),
            enabled: true,
            configuration: serde_json::Value::Null,
        }
    }
}

/// Policy steps of a flow, per phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowSteps {
    pub request: Vec<PolicyStep>,
    pub response: Vec<PolicyStep>,
    pub publish: Vec<PolicyStep>,
    pub subscribe: Vec<PolicyStep>,
}

/// An ordered set of policies guarded by selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    id: String,
    name: Option<String>,
    enabled: bool,
    selectors: Vec<Selector>,
    steps: FlowSteps,
}

impl Flow {
    /// Create an enabled flow without selectors (accepts every request).
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            selectors: Vec::new(),
            steps: FlowSteps::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Attach a selector, replacing any selector of the same kind.
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selectors.retain(|s| !s.same_kind(&selector));
        self.selectors.push(selector);
        self
    }

    pub fn with_steps(mut self, steps: FlowSteps) -> Self {
        self.steps = steps;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn http_selector(&self) -> Option<&HttpSelector> {
        self.selectors.iter().find_map(|s| match s {
            Selector::Http(http) => Some(http),
            _ => None,
        })
    }

    pub fn channel_selector(&self) -> Option<&ChannelSelector> {
        self.selectors.iter().find_map(|s| match s {
            Selector::Channel(channel) => Some(channel),
            _ => None,
        })
    }

    /// Policy steps this flow contributes in `phase`.
    pub fn steps(&self, phase: Phase) -> &[PolicyStep] {
        match phase {
            Phase::Request => &self.steps.request,
            Phase::Response => &self.steps.response,
            Phase::MessageRequest => &self.steps.publish,
            Phase::MessageResponse => &self.steps.subscribe,
        }
    }
}
