//! In-memory flow registry.
//!
//! # Responsibilities
//! - Hold the deployed flows of every API
//! - Replace an API's flows atomically on redeploy
//!
//! # Design Decisions
//! - Read-mostly: lookups clone an `Arc`, redeploys swap the whole list
//! - Readers never observe a partially deployed API

use std::sync::Arc;

use dashmap::DashMap;

use crate::flow::model::Flow;
use crate::flow::resolver::{FlowList, FlowSource};

/// Concurrent api-id → flows map.
#[derive(Debug, Default)]
pub struct FlowStore {
    apis: DashMap<String, FlowList>,
}

impl FlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy (or redeploy) the flows of `api_id`.
    pub fn deploy(&self, api_id: impl Into<String>, flows: Vec<Flow>) {
        let api_id = api_id.into();
        let flows: FlowList = Arc::new(flows.into_iter().map(Arc::new).collect());
        tracing::info!(api = %api_id, flows = flows.len(), "API flows deployed");
        self.apis.insert(api_id, flows);
    }

    /// Remove the flows of `api_id`. Returns true if the API was deployed.
    pub fn undeploy(&self, api_id: &str) -> bool {
        let removed = self.apis.remove(api_id).is_some();
        if removed {
            tracing::info!(api = %api_id, "API flows undeployed");
        }
        removed
    }

    pub fn api_ids(&self) -> Vec<String> {
        self.apis.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

impl FlowSource for FlowStore {
    fn flows_for(&self, api_id: &str) -> FlowList {
        self.apis
            .get(api_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}
