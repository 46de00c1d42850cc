//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (APIs reference existing endpoint groups)
//! - Detect duplicate ids and unusable templates or targets
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::DispatchConfig;
use crate::flow::pattern::PathPattern;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate API id '{0}'")]
    DuplicateApi(String),

    #[error("API '{api}': duplicate flow id '{flow}'")]
    DuplicateFlow { api: String, flow: String },

    #[error("API '{api}': flow '{flow}' has invalid template '{template}'")]
    InvalidTemplate { api: String, flow: String, template: String },

    #[error("API '{api}' references unknown endpoint group '{group}'")]
    UnknownGroup { api: String, group: String },

    #[error("duplicate endpoint group '{0}'")]
    DuplicateGroup(String),

    #[error("group '{group}': duplicate endpoint '{endpoint}'")]
    DuplicateEndpoint { group: String, endpoint: String },

    #[error("group '{group}': endpoint '{endpoint}' has invalid target '{target}'")]
    InvalidTarget { group: String, endpoint: String, target: String },

    #[error("failover.max_attempts must be at least 1")]
    ZeroAttempts,
}

pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.failover.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }

    let mut groups = HashSet::new();
    for group in &config.endpoint_groups {
        if !groups.insert(group.name.as_str()) {
            errors.push(ValidationError::DuplicateGroup(group.name.clone()));
        }

        let mut endpoints = HashSet::new();
        for endpoint in &group.endpoints {
            if !endpoints.insert(endpoint.name.as_str()) {
                errors.push(ValidationError::DuplicateEndpoint {
                    group: group.name.clone(),
                    endpoint: endpoint.name.clone(),
                });
            }
            let valid_target = Url::parse(&endpoint.target).is_ok_and(|url| !url.cannot_be_a_base());
            if !valid_target {
                errors.push(ValidationError::InvalidTarget {
                    group: group.name.clone(),
                    endpoint: endpoint.name.clone(),
                    target: endpoint.target.clone(),
                });
            }
        }
    }

    let mut apis = HashSet::new();
    for api in &config.apis {
        if !apis.insert(api.id.as_str()) {
            errors.push(ValidationError::DuplicateApi(api.id.clone()));
        }
        if !groups.contains(api.endpoint_group.as_str()) {
            errors.push(ValidationError::UnknownGroup {
                api: api.id.clone(),
                group: api.endpoint_group.clone(),
            });
        }

        let mut flows = HashSet::new();
        for flow in &api.flows {
            if !flows.insert(flow.id.as_str()) {
                errors.push(ValidationError::DuplicateFlow {
                    api: api.id.clone(),
                    flow: flow.id.clone(),
                });
            }

            let templates = flow
                .http
                .iter()
                .map(|s| s.path.as_str())
                .chain(flow.channel.iter().map(|s| s.channel.as_str()));
            for template in templates {
                if !PathPattern::compile(template).is_valid() {
                    errors.push(ValidationError::InvalidTemplate {
                        api: api.id.clone(),
                        flow: flow.id.clone(),
                        template: template.to_string(),
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
