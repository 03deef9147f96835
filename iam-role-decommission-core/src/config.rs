//! Run configuration, passed explicitly into the orchestrator

use crate::aws::arn::{extract_account_from_arn, extract_role_name_from_arn};
use crate::error::FatalError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Days a role must exceed in both age and idleness.
pub const DEFAULT_THRESHOLD_DAYS: i64 = 25;

pub const DEFAULT_REGION: &str = "us-east-1";

/// STS RoleSessionName: 2-64 characters of `[\w+=,.@-]`.
fn session_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\w+=,.@-]{2,64}$").unwrap_or_else(|e| panic!("invalid session regex: {e}"))
    })
}

/// How far the pipeline goes for an eligible role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Stop after the dual-location backup
    Backup,
    /// Back up, then decommission
    Delete,
}

impl RunMode {
    pub fn is_destructive(self) -> bool {
        self == Self::Delete
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backup => f.write_str("backup"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Bounded exponential backoff for backup uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled after each further one
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following the zero-based failed `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct DecommissionConfig {
    /// Role in the control account, assumed with the ambient identity
    pub control_role_arn: String,
    /// Role assumed in every target account
    pub delegation_role_name: String,
    pub session_label: String,
    pub threshold_days: i64,
    /// Local root for backup artifacts
    pub workspace: PathBuf,
    /// Destination bucket for remote backup copies
    pub bucket: String,
    pub region: String,
    pub mode: RunMode,
    pub retry: RetryPolicy,
}

impl DecommissionConfig {
    pub fn validate(&self) -> Result<(), FatalError> {
        if extract_account_from_arn(&self.control_role_arn).is_none()
            || self.control_role_name().is_none()
        {
            return Err(FatalError::configuration(format!(
                "control role ARN '{}' is not an IAM role ARN with a 12-digit account id",
                self.control_role_arn
            )));
        }
        if self.delegation_role_name.trim().is_empty() {
            return Err(FatalError::configuration("delegation role name is empty"));
        }
        if !session_label_pattern().is_match(&self.session_label) {
            return Err(FatalError::configuration(format!(
                "session label '{}' must be 2-64 characters of letters, digits and +=,.@_-",
                self.session_label
            )));
        }
        if self.threshold_days <= 0 {
            return Err(FatalError::configuration(format!(
                "threshold must be a positive number of days, got {}",
                self.threshold_days
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(FatalError::configuration("backup bucket is empty"));
        }
        if self.region.trim().is_empty() {
            return Err(FatalError::configuration("region is empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(FatalError::configuration(
                "upload retry policy needs at least one attempt",
            ));
        }
        Ok(())
    }

    pub fn control_role_name(&self) -> Option<String> {
        extract_role_name_from_arn(&self.control_role_arn)
    }

    /// Roles that must never be processed: the delegation role and the
    /// broker's own control role.
    pub fn protected_roles(&self) -> Vec<String> {
        let mut roles = vec![self.delegation_role_name.clone()];
        if let Some(control) = self.control_role_name() {
            if !control.eq_ignore_ascii_case(&self.delegation_role_name) {
                roles.push(control);
            }
        }
        roles
    }

    /// IAM role names are case-insensitive, so `Delegate` is the delegation role.
    pub fn is_protected(&self, role_name: &str) -> bool {
        let role_name = role_name.trim();
        self.protected_roles()
            .iter()
            .any(|r| r.eq_ignore_ascii_case(role_name))
    }
}
