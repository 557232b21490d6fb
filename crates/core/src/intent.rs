// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired state: resource intents and released model versions.

use crate::resource::{strip_version, IdError, ResourceId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Attribute key listing the resource's requirements
pub const ATTR_REQUIRES: &str = "requires";
/// Attribute key enabling events towards dependents
pub const ATTR_SEND_EVENT: &str = "send_event";
/// Attribute key opting in to events from requirements
pub const ATTR_RECEIVE_EVENTS: &str = "receive_events";

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("attributes of {0} must be a JSON object")]
    NotAnObject(ResourceId),
    #[error("invalid requirement of {resource}: {source}")]
    Requirement {
        resource: ResourceId,
        #[source]
        source: IdError,
    },
    #[error("resource {0} requires itself")]
    SelfRequirement(ResourceId),
}

/// Desired attributes of one resource as of the latest known version.
///
/// Replaced wholesale when a newer version redefines the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIntent {
    pub id: ResourceId,
    pub attribute_hash: String,
    pub attributes: Value,
    pub requires: BTreeSet<ResourceId>,
    pub send_event: bool,
    pub receive_events: bool,
}

impl ResourceIntent {
    /// Build an intent from raw attributes, extracting `requires`,
    /// `send_event` (default false) and `receive_events` (default true).
    pub fn from_attributes(id: ResourceId, attributes: Value) -> Result<Self, IntentError> {
        let obj = attributes.as_object().ok_or_else(|| IntentError::NotAnObject(id.clone()))?;
        let mut requires = BTreeSet::new();
        for req in obj.get(ATTR_REQUIRES).and_then(Value::as_array).into_iter().flatten() {
            let raw = req.as_str().unwrap_or_default();
            let rid = ResourceId::parse(strip_version(raw))
                .map_err(|source| IntentError::Requirement { resource: id.clone(), source })?;
            if rid == id {
                return Err(IntentError::SelfRequirement(id));
            }
            requires.insert(rid);
        }
        let send_event = obj.get(ATTR_SEND_EVENT).and_then(Value::as_bool).unwrap_or(false);
        let receive_events = obj.get(ATTR_RECEIVE_EVENTS).and_then(Value::as_bool).unwrap_or(true);
        Ok(Self {
            attribute_hash: attribute_hash(&attributes),
            id,
            attributes,
            requires,
            send_event,
            receive_events,
        })
    }
}

crate::builder! {
    pub struct ResourceIntentBuilder => ResourceIntent {
        into {
            id: ResourceId = "test::Res[agent1,name=a]",
            attribute_hash: String = "h1",
        }
        set {
            attributes: Value = Value::Object(Default::default()),
            requires: BTreeSet<ResourceId> = BTreeSet::new(),
            send_event: bool = false,
            receive_events: bool = true,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ResourceIntentBuilder {
    /// Add one requirement
    pub fn require(mut self, rid: impl Into<ResourceId>) -> Self {
        self.requires.insert(rid.into());
        self
    }
}

/// SHA-256 over the canonical (key-sorted, compact) JSON form
pub fn attribute_hash(attributes: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(attributes, &mut canonical);
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// An immutable, numbered snapshot of the full intended resource graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u64,
    pub resources: IndexMap<ResourceId, ResourceIntent>,
    /// Resources present in the version whose intent can not be deployed
    pub undefined: HashSet<ResourceId>,
}

impl ModelVersion {
    pub fn new(version: u64) -> Self {
        Self { version, ..Default::default() }
    }

    pub fn with_resource(mut self, intent: ResourceIntent) -> Self {
        self.resources.insert(intent.id.clone(), intent);
        self
    }

    pub fn with_undefined(mut self, intent: ResourceIntent) -> Self {
        self.undefined.insert(intent.id.clone());
        self.with_resource(intent)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    pub fn is_undefined(&self, resource: &str) -> bool {
        self.undefined.contains(resource)
    }
}

#[cfg(test)]
#[path = "intent_tests.rs"]
mod tests;
