//! Role snapshot: the self-contained, restorable record of one role
//!
//! Policy documents and the trust policy are kept as opaque JSON values and
//! preserved verbatim. Only the envelope has a fixed schema. Maps are
//! `BTreeMap`s so the serialized form has a deterministic key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsBoundary {
    pub arn: Option<String>,
    pub boundary_type: Option<String>,
}

/// Core role metadata, the input of the eligibility decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleIdentity {
    pub name: String,
    pub arn: String,
    pub role_id: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_region: Option<String>,
    pub description: Option<String>,
    pub max_session_duration: Option<i32>,
    pub permissions_boundary: Option<PermissionsBoundary>,
}

/// A managed policy attached to the role, resolved to its current version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedPolicy {
    pub arn: String,
    pub policy_id: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<Tag>,
    pub version_id: String,
    pub document: Value,
    pub permissions_boundary_usage_count: Option<i32>,
    pub attachment_count: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Attached managed policies keyed by policy name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManagedPolicies {
    /// Published by AWS (`arn:aws:iam::aws:policy/...`)
    pub platform: BTreeMap<String, ManagedPolicy>,
    /// Authored in the account
    pub customer: BTreeMap<String, ManagedPolicy>,
}

impl ManagedPolicies {
    pub fn len(&self) -> usize {
        self.platform.len() + self.customer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platform.is_empty() && self.customer.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceProfile {
    pub arn: String,
    pub name: String,
    pub id: String,
    pub path: String,
    pub role_names: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The complete state of a role at inspection time.
///
/// A value of this type only exists when every sub-collection was retrieved
/// in full; the inspector never builds a partial one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleSnapshot {
    pub account_id: String,
    pub collected_at: DateTime<Utc>,
    pub role: RoleIdentity,
    pub trust_policy: Value,
    pub tags: Vec<Tag>,
    pub managed_policies: ManagedPolicies,
    pub inline_policies: BTreeMap<String, Value>,
    pub instance_profiles: Vec<InstanceProfile>,
}

impl RoleSnapshot {
    /// Serialize into the persisted backup document.
    pub fn to_document(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a persisted backup document.
    pub fn from_document(document: &str) -> serde_json::Result<Self> {
        serde_json::from_str(document)
    }
}
