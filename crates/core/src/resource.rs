// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource identifiers.
//!
//! A resource is identified by `entity_type[agent,attribute=value]`, e.g.
//! `std::File[host1,path=/etc/motd]`. The version-qualified form appends
//! `,v=<version>`.

use thiserror::Error;

crate::define_id! {
    /// Stable identifier of a managed resource within an environment.
    ///
    /// Construct through [`ResourceId::parse`] for untrusted input; the
    /// accessors are total and return empty slices for malformed IDs.
    pub struct ResourceId;
}

crate::define_id! {
    /// A [`ResourceId`] qualified with the model version it was deployed from.
    pub struct ResourceVersionId;
}

/// Errors from parsing resource identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid resource id '{0}': {1}")]
    Invalid(String, &'static str),
    #[error("invalid version in resource version id '{0}'")]
    InvalidVersion(String),
}

impl ResourceId {
    /// Parse and validate a resource id. A trailing `,v=<n>` is rejected;
    /// use [`ResourceVersionId::parse`] for version-qualified ids.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let invalid = |why| IdError::Invalid(s.to_string(), why);
        let (entity_type, rest) = s.split_once('[').ok_or_else(|| invalid("missing '['"))?;
        let body = rest.strip_suffix(']').ok_or_else(|| invalid("missing trailing ']'"))?;
        let (ns, class) =
            entity_type.rsplit_once("::").ok_or_else(|| invalid("type needs a namespace"))?;
        if ns.is_empty() || class.is_empty() || !entity_type.split("::").all(is_ident) {
            return Err(invalid("malformed entity type"));
        }
        let (agent, attr_value) = body.split_once(',').ok_or_else(|| invalid("missing agent"))?;
        if agent.is_empty() {
            return Err(invalid("empty agent name"));
        }
        let (attr, value) = attr_value.split_once('=').ok_or_else(|| invalid("missing attribute"))?;
        if attr.is_empty() || value.is_empty() || value.contains(']') {
            return Err(invalid("malformed attribute"));
        }
        Ok(Self::new(s))
    }

    /// Build a resource id from its parts
    pub fn from_parts(entity_type: &str, agent: &str, attribute: &str, value: &str) -> Self {
        Self::new(format!("{entity_type}[{agent},{attribute}={value}]"))
    }

    pub fn entity_type(&self) -> &str {
        self.split_once('[').map(|(t, _)| t).unwrap_or("")
    }

    /// The agent responsible for deploying this resource
    pub fn agent_name(&self) -> &str {
        self.body().and_then(|b| b.split_once(',')).map(|(a, _)| a).unwrap_or("")
    }

    /// The identifying attribute name
    pub fn attribute(&self) -> &str {
        self.attr_value().map(|(a, _)| a).unwrap_or("")
    }

    pub fn attribute_value(&self) -> &str {
        self.attr_value().map(|(_, v)| v).unwrap_or("")
    }

    pub fn with_version(&self, version: u64) -> ResourceVersionId {
        ResourceVersionId::new(format!("{self},v={version}"))
    }

    fn body(&self) -> Option<&str> {
        self.split_once('[').and_then(|(_, rest)| rest.strip_suffix(']'))
    }

    fn attr_value(&self) -> Option<(&str, &str)> {
        self.body().and_then(|b| b.split_once(',')).and_then(|(_, av)| av.split_once('='))
    }
}

impl ResourceVersionId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let (rid, version) =
            s.rsplit_once(",v=").ok_or_else(|| IdError::Invalid(s.to_string(), "missing ',v='"))?;
        ResourceId::parse(rid)?;
        version.parse::<u64>().map_err(|_| IdError::InvalidVersion(s.to_string()))?;
        Ok(Self::new(s))
    }

    /// The unversioned resource id
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.rsplit_once(",v=").map(|(rid, _)| rid).unwrap_or(self.as_str()))
    }

    pub fn version(&self) -> Option<u64> {
        self.rsplit_once(",v=").and_then(|(_, v)| v.parse().ok())
    }
}

/// Strip a `,v=<n>` suffix if present, e.g. for `requires` entries that
/// carry the version they were compiled in.
pub fn strip_version(s: &str) -> &str {
    match s.rsplit_once(",v=") {
        Some((rid, v)) if v.parse::<u64>().is_ok() => rid,
        _ => s,
    }
}

fn is_ident(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
