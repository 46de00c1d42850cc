//! Configuration schema definitions.
//!
//! This module defines the declarative dispatch configuration: APIs with their
//! flows, endpoint groups, failover bounds and logging.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::flow::model::{ChannelSelector, Flow, FlowSteps, HttpSelector, PolicyStep, Selector};
use crate::invoker::failover::FailoverOptions;
use crate::load_balancer::endpoint::EndpointDefinition;
use crate::load_balancer::LoadBalancerKind;

/// Root configuration of the dispatch core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Failover bounds shared by every API.
    pub failover: FailoverConfig,

    /// Deployed APIs and their flows.
    pub apis: Vec<ApiConfig>,

    /// Endpoint groups APIs dispatch to.
    pub endpoint_groups: Vec<EndpointGroupConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Disabled = a single attempt per invocation.
    pub enabled: bool,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Budget across all attempts (milliseconds).
    pub retry_timeout_ms: u64,

    /// Base backoff between attempts (milliseconds, 0 = immediate).
    pub base_delay_ms: u64,

    /// Backoff cap (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        let defaults = FailoverOptions::default();
        Self {
            enabled: true,
            max_attempts: defaults.max_attempts,
            retry_timeout_ms: defaults.retry_timeout.as_millis() as u64,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl FailoverConfig {
    pub fn to_options(&self) -> FailoverOptions {
        FailoverOptions {
            max_attempts: if self.enabled { self.max_attempts } else { 1 },
            retry_timeout: Duration::from_millis(self.retry_timeout_ms),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// How an API narrows its matching flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowMode {
    /// Every matching flow, in definition order.
    #[default]
    Default,
    /// Only the most path-specific matching flow.
    BestMatch,
}

/// One deployed API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Unique API id.
    pub id: String,

    /// Prefix stripped from request paths to form the path info.
    #[serde(default)]
    pub context_path: Option<String>,

    #[serde(default)]
    pub flow_mode: FlowMode,

    /// Endpoint group used when no target override is set.
    pub endpoint_group: String,

    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

/// Declarative flow definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub http: Option<HttpSelector>,

    #[serde(default)]
    pub channel: Option<ChannelSelector>,

    #[serde(default)]
    pub request: Vec<PolicyStep>,

    #[serde(default)]
    pub response: Vec<PolicyStep>,

    #[serde(default)]
    pub publish: Vec<PolicyStep>,

    #[serde(default)]
    pub subscribe: Vec<PolicyStep>,
}

fn default_true() -> bool {
    true
}

impl FlowConfig {
    pub fn to_flow(&self) -> Flow {
        let mut flow = Flow::new(&self.id)
            .with_enabled(self.enabled)
            .with_steps(FlowSteps {
                request: self.request.clone(),
                response: self.response.clone(),
                publish: self.publish.clone(),
                subscribe: self.subscribe.clone(),
            });
        if let Some(name) = &self.name {
            flow = flow.with_name(name);
        }
        if let Some(http) = &self.http {
            flow = flow.with_selector(Selector::Http(http.clone()));
        }
        if let Some(channel) = &self.channel {
            flow = flow.with_selector(Selector::Channel(channel.clone()));
        }
        flow
    }
}

/// Endpoint group definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointGroupConfig {
    /// Unique group name.
    pub name: String,

    #[serde(default)]
    pub load_balancer: LoadBalancerKind,

    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}
