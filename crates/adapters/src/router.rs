// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor registry keyed by entity type.
//!
//! Populated by explicit `register` calls at startup. Lookups fall back to
//! the default executor, if any.

use crate::executor::{DeployRequest, DryRunRequest, Executor, ExecutorError, FactRequest};
use async_trait::async_trait;
use cv_core::{DeployReport, DryrunReport, FactReport};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Registry {
    by_type: HashMap<String, Arc<dyn Executor>>,
    fallback: Option<Arc<dyn Executor>>,
}

/// Routes each call to the executor registered for the resource's entity type
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `entity_type`, replacing any previous one
    pub fn register(&self, entity_type: impl Into<String>, executor: Arc<dyn Executor>) {
        let entity_type = entity_type.into();
        tracing::debug!(%entity_type, "registered executor");
        self.inner.write().by_type.insert(entity_type, executor);
    }

    pub fn set_default(&self, executor: Arc<dyn Executor>) {
        self.inner.write().fallback = Some(executor);
    }

    /// Drop every registration
    pub fn reset(&self) {
        *self.inner.write() = Registry::default();
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.inner.read().by_type.contains_key(entity_type)
    }

    pub fn resolve(&self, entity_type: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        let registry = self.inner.read();
        registry
            .by_type
            .get(entity_type)
            .or(registry.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ExecutorError::NoHandler(entity_type.to_string()))
    }
}

#[async_trait]
impl Executor for ExecutorRegistry {
    async fn deploy(
        &self,
        request: DeployRequest,
        cancel: CancellationToken,
    ) -> Result<DeployReport, ExecutorError> {
        let executor = self.resolve(request.intent.id.entity_type())?;
        executor.deploy(request, cancel).await
    }

    async fn dry_run(
        &self,
        request: DryRunRequest,
        cancel: CancellationToken,
    ) -> Result<DryrunReport, ExecutorError> {
        let executor = self.resolve(request.intent.id.entity_type())?;
        executor.dry_run(request, cancel).await
    }

    async fn get_facts(
        &self,
        request: FactRequest,
        cancel: CancellationToken,
    ) -> Result<FactReport, ExecutorError> {
        let executor = self.resolve(request.resource_id.entity_type())?;
        executor.get_facts(request, cancel).await
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
