//! Ordered, verified role teardown
//!
//! Steps run strictly in [`TeardownStep::ORDER`]; the first failure stops the
//! run and is recorded in the [`DeletionOutcome`]. Completed steps are not
//! rolled back, the backup artifact covers recovery.

use crate::aws::iam_client::IamApi;
use crate::aws::AwsError;
use crate::eligibility::{evaluate, EligibilityVerdict};
use crate::snapshot::{ManagedPolicy, RoleSnapshot};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    EligibilityGuard,
    ConfirmPresence,
    RemoveInstanceProfiles,
    DetachPlatformPolicies,
    DetachCustomerPolicies,
    DeleteInlinePolicies,
    DeleteRole,
    VerifyDeletion,
}

impl TeardownStep {
    pub const ORDER: [Self; 8] = [
        Self::EligibilityGuard,
        Self::ConfirmPresence,
        Self::RemoveInstanceProfiles,
        Self::DetachPlatformPolicies,
        Self::DetachCustomerPolicies,
        Self::DeleteInlinePolicies,
        Self::DeleteRole,
        Self::VerifyDeletion,
    ];
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EligibilityGuard => "eligibility guard",
            Self::ConfirmPresence => "confirm presence",
            Self::RemoveInstanceProfiles => "remove instance profiles",
            Self::DetachPlatformPolicies => "detach platform policies",
            Self::DetachCustomerPolicies => "detach customer policies",
            Self::DeleteInlinePolicies => "delete inline policies",
            Self::DeleteRole => "delete role",
            Self::VerifyDeletion => "verify deletion",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
enum StepFailure {
    #[error("snapshot belongs to role '{0}'")]
    SnapshotMismatch(String),
    #[error("role is no longer eligible: {0}")]
    NotEligible(EligibilityVerdict),
    #[error("role not found")]
    RoleNotFound,
    #[error("role still exists after deletion")]
    StillPresent,
    #[error(transparent)]
    Api(#[from] AwsError),
}

/// Terminal result of one teardown run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub role_name: String,
    pub succeeded: bool,
    pub verified: bool,
    pub failed_step: Option<TeardownStep>,
    pub role_not_found: bool,
    pub error: Option<String>,
}

pub struct RoleDecommissioner {
    iam: Arc<dyn IamApi>,
    account_id: String,
    threshold_days: i64,
}

impl RoleDecommissioner {
    pub fn new(iam: Arc<dyn IamApi>, account_id: impl Into<String>, threshold_days: i64) -> Self {
        Self {
            iam,
            account_id: account_id.into(),
            threshold_days,
        }
    }

    /// Tear down `role_name` using the resource lists captured in `snapshot`.
    pub async fn decommission(
        &self,
        role_name: &str,
        snapshot: &RoleSnapshot,
        now: DateTime<Utc>,
    ) -> DeletionOutcome {
        info!(
            "Decommissioning role {role_name} in account {}",
            self.account_id
        );
        for step in TeardownStep::ORDER {
            debug!("Step '{step}' for role {role_name} in account {}", self.account_id);
            if let Err(failure) = self.run_step(step, role_name, snapshot, now).await {
                return self.failed(role_name, step, &failure);
            }
        }

        info!(
            "SUCCESS: role {role_name} deleted and verified in account {}",
            self.account_id
        );
        DeletionOutcome {
            role_name: role_name.to_string(),
            succeeded: true,
            verified: true,
            failed_step: None,
            role_not_found: false,
            error: None,
        }
    }

    fn failed(&self, role_name: &str, step: TeardownStep, failure: &StepFailure) -> DeletionOutcome {
        let role_not_found = matches!(failure, StepFailure::RoleNotFound);
        if role_not_found {
            warn!(
                "Role {role_name} not found in account {}, nothing to delete",
                self.account_id
            );
        } else {
            error!(
                "Teardown of role {role_name} in account {} stopped at '{step}': {failure}",
                self.account_id
            );
        }
        DeletionOutcome {
            role_name: role_name.to_string(),
            succeeded: false,
            verified: false,
            failed_step: Some(step),
            role_not_found,
            error: Some(failure.to_string()),
        }
    }

    async fn run_step(
        &self,
        step: TeardownStep,
        role_name: &str,
        snapshot: &RoleSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), StepFailure> {
        match step {
            TeardownStep::EligibilityGuard => self.eligibility_guard(role_name, snapshot, now),
            TeardownStep::ConfirmPresence => match self.iam.get_role(role_name).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Err(StepFailure::RoleNotFound),
                Err(e) => Err(e.into()),
            },
            TeardownStep::RemoveInstanceProfiles => {
                for profile in &snapshot.instance_profiles {
                    info!(
                        "Removing role {role_name} from instance profile {} in account {}",
                        profile.name, self.account_id
                    );
                    self.iam
                        .remove_role_from_instance_profile(&profile.name, role_name)
                        .await?;
                    self.iam.delete_instance_profile(&profile.name).await?;
                }
                Ok(())
            }
            TeardownStep::DetachPlatformPolicies => {
                self.detach(role_name, &snapshot.managed_policies.platform, "platform")
                    .await
            }
            TeardownStep::DetachCustomerPolicies => {
                self.detach(role_name, &snapshot.managed_policies.customer, "customer")
                    .await
            }
            TeardownStep::DeleteInlinePolicies => {
                for policy_name in snapshot.inline_policies.keys() {
                    info!(
                        "Deleting inline policy {policy_name} from role {role_name} in account {}",
                        self.account_id
                    );
                    self.iam.delete_role_policy(role_name, policy_name).await?;
                }
                Ok(())
            }
            TeardownStep::DeleteRole => {
                info!("Deleting role {role_name} in account {}", self.account_id);
                self.iam.delete_role(role_name).await?;
                Ok(())
            }
            TeardownStep::VerifyDeletion => match self.iam.get_role(role_name).await {
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
                Ok(_) => Err(StepFailure::StillPresent),
            },
        }
    }

    /// Re-check the snapshot before anything is touched. No API calls.
    fn eligibility_guard(
        &self,
        role_name: &str,
        snapshot: &RoleSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), StepFailure> {
        if snapshot.role.name != role_name {
            return Err(StepFailure::SnapshotMismatch(snapshot.role.name.clone()));
        }
        let verdict = evaluate(&snapshot.role, self.threshold_days, now);
        if !verdict.eligible {
            return Err(StepFailure::NotEligible(verdict));
        }
        Ok(())
    }

    async fn detach(
        &self,
        role_name: &str,
        policies: &BTreeMap<String, ManagedPolicy>,
        kind: &str,
    ) -> Result<(), StepFailure> {
        for (policy_name, policy) in policies {
            info!(
                "Detaching {kind} policy {policy_name} from role {role_name} in account {}",
                self.account_id
            );
            self.iam.detach_role_policy(role_name, &policy.arn).await?;
        }
        Ok(())
    }
}
