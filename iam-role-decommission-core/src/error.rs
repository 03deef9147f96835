//! Error types for IAM role decommissioning
//!
//! Two families: [`DecommissionError`] is scoped to one role or account and
//! means "skip and continue"; [`FatalError`] aborts the whole run. Credential
//! delegation failures can be either, and [`DelegationError::escalate`] makes
//! the caller pick a side explicitly.

use crate::aws::AwsError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Part of a role snapshot, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSection {
    Role,
    Tags,
    AttachedPolicies,
    InlinePolicies,
    InstanceProfiles,
}

impl fmt::Display for SnapshotSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Role => "role metadata",
            Self::Tags => "role tags",
            Self::AttachedPolicies => "attached policies",
            Self::InlinePolicies => "inline policies",
            Self::InstanceProfiles => "instance profiles",
        };
        f.write_str(text)
    }
}

/// Failure to build a complete role snapshot.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Role {role_name} not found in account {account_id}")]
    NotFound {
        account_id: String,
        role_name: String,
    },

    /// The API answered but violated its own contract (missing attributes).
    #[error("Protocol error collecting {section} for role {role_name} in account {account_id}: {detail}")]
    Protocol {
        account_id: String,
        role_name: String,
        section: SnapshotSection,
        detail: String,
    },

    #[error("Failed to collect {section} for role {role_name} in account {account_id}: {source}")]
    Collection {
        account_id: String,
        role_name: String,
        section: SnapshotSection,
        source: AwsError,
    },
}

impl InspectError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationHop {
    /// Ambient identity into the control account
    Control,
    /// Control account into a target account
    Target,
}

impl fmt::Display for DelegationHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Target => f.write_str("target"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DelegationFailure {
    #[error("delegation denied: {0}")]
    Denied(AwsError),

    #[error("no credentials returned")]
    MissingCredentials,

    #[error("identity verification failed: {0}")]
    IdentityCheck(AwsError),

    #[error("identity mismatch: expected account {expected}, credential belongs to {actual}")]
    IdentityMismatch { expected: String, actual: String },
}

/// One failed hop of the delegation chain.
#[derive(Error, Debug)]
#[error("{hop} delegation to {role_arn} failed: {failure}")]
pub struct DelegationError {
    pub hop: DelegationHop,
    pub role_arn: String,
    #[source]
    pub failure: DelegationFailure,
}

impl DelegationError {
    /// Losing the control identity or landing in the wrong account leaves
    /// nothing safe to do, so those abort the run.
    pub fn is_fatal(&self) -> bool {
        self.hop == DelegationHop::Control
            || matches!(self.failure, DelegationFailure::IdentityMismatch { .. })
    }

    /// Split into an account-scoped failure or a run-aborting one.
    pub fn escalate(self, account_id: &str) -> Result<DecommissionError, FatalError> {
        if self.is_fatal() {
            Err(FatalError::Delegation(self))
        } else {
            Ok(DecommissionError::Delegation {
                account_id: account_id.to_string(),
                source: self,
            })
        }
    }
}

/// Failure to produce a verified, dual-location backup.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Backup verification failed for {}: {detail}", .path.display())]
    Verification { path: PathBuf, detail: String },

    #[error("Upload to {location} failed after {attempts} attempt(s): {source}")]
    Upload {
        location: String,
        attempts: u32,
        source: AwsError,
    },

    #[error("Failed to archive {}: {detail}", .path.display())]
    Archive { path: PathBuf, detail: String },
}

/// Role- or account-scoped failure. The unit is skipped, the batch goes on.
#[derive(Error, Debug)]
pub enum DecommissionError {
    #[error("Refusing to process protected role {role_name} in account {account_id}")]
    ProtectedRole {
        account_id: String,
        role_name: String,
    },

    #[error("Credential delegation failed for account {account_id}: {source}")]
    Delegation {
        account_id: String,
        source: DelegationError,
    },

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error("Backup of role {role_name} in account {account_id} failed: {source}")]
    Backup {
        account_id: String,
        role_name: String,
        source: BackupError,
    },
}

/// Conditions under which the run must stop with a non-zero status.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("Credential delegation aborted the run: {0}")]
    Delegation(DelegationError),

    #[error("Failed to read input file {}: {source}", .path.display())]
    InputRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid input at line {line}: {detail}")]
    InvalidInput { line: usize, detail: String },

    #[error("Input contains no account/role entries")]
    EmptyInput,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FatalError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
