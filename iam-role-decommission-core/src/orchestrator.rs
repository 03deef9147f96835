//! Batch driver: accounts, then roles, strictly sequential
//!
//! Per-role failures are logged and recorded, an account-scoped delegation
//! failure skips the rest of that account, and only [`FatalError`] stops the
//! run. Each account's backups are archived once its roles are done.

use crate::assignments::AccountAssignment;
use crate::aws::credentials::AccountCredential;
use crate::aws::iam_client::IamConnector;
use crate::aws::s3::ObjectSink;
use crate::aws::sts::DelegationService;
use crate::broker::CredentialBroker;
use crate::config::{DecommissionConfig, RunMode};
use crate::decommission::{DeletionOutcome, RoleDecommissioner};
use crate::eligibility::{evaluate, EligibilityVerdict};
use crate::error::{DecommissionError, DelegationError, FatalError};
use crate::inspector::RoleInspector;
use crate::snapshot::RoleSnapshot;
use crate::store::{BackupArtifact, SnapshotStore};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a role ended up in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleDisposition {
    /// Delegation or control role, never touched
    Protected,
    /// Skipped because the account could not be reached
    Skipped,
    NotFound,
    NotEligible,
    /// Backed up in both locations; teardown not requested
    BackedUp,
    Decommissioned,
    /// Backed up, but teardown stopped at a step
    DeletionFailed,
    /// Inspection or backup failed; nothing was deleted
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleReport {
    pub role_name: String,
    pub disposition: RoleDisposition,
    pub verdict: Option<EligibilityVerdict>,
    pub backup: Option<BackupArtifact>,
    pub deletion: Option<DeletionOutcome>,
    pub error: Option<String>,
}

impl RoleReport {
    fn new(role_name: &str, disposition: RoleDisposition) -> Self {
        Self {
            role_name: role_name.to_string(),
            disposition,
            verdict: None,
            backup: None,
            deletion: None,
            error: None,
        }
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account_id: String,
    pub roles: Vec<RoleReport>,
    pub archive: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub accounts: usize,
    pub roles: usize,
    pub decommissioned: usize,
    pub backed_up: usize,
    pub not_eligible: usize,
    pub not_found: usize,
    pub protected: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Accounts that recorded an error of their own (delegation, archive)
    pub account_errors: usize,
}

impl RunSummary {
    /// True when some role could not be taken to its requested end state.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.skipped > 0 || self.account_errors > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            accounts: self.accounts.len(),
            account_errors: self.accounts.iter().filter(|a| a.error.is_some()).count(),
            ..RunSummary::default()
        };
        for role in self.accounts.iter().flat_map(|a| &a.roles) {
            summary.roles += 1;
            match role.disposition {
                RoleDisposition::Decommissioned => summary.decommissioned += 1,
                RoleDisposition::BackedUp => summary.backed_up += 1,
                RoleDisposition::NotEligible => summary.not_eligible += 1,
                RoleDisposition::NotFound => summary.not_found += 1,
                RoleDisposition::Protected => summary.protected += 1,
                RoleDisposition::Skipped => summary.skipped += 1,
                RoleDisposition::DeletionFailed | RoleDisposition::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Read-only result of the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub verdict: EligibilityVerdict,
    pub snapshot: RoleSnapshot,
}

pub struct AccountOrchestrator {
    config: DecommissionConfig,
    broker: CredentialBroker,
    connector: Arc<dyn IamConnector>,
    store: SnapshotStore,
}

impl AccountOrchestrator {
    pub fn new(
        config: DecommissionConfig,
        delegation: Arc<dyn DelegationService>,
        connector: Arc<dyn IamConnector>,
        sink: Arc<dyn ObjectSink>,
    ) -> Result<Self, FatalError> {
        config.validate()?;
        let broker = CredentialBroker::new(delegation, config.control_role_arn.clone())?;
        let store = SnapshotStore::new(config.workspace.clone(), sink, config.retry);
        Ok(Self {
            config,
            broker,
            connector,
            store,
        })
    }

    pub async fn run(&self, assignments: &[AccountAssignment]) -> Result<RunReport, FatalError> {
        let started_at = Utc::now();
        info!(
            "Starting {} run over {} account(s), threshold {} days",
            self.config.mode,
            assignments.len(),
            self.config.threshold_days
        );

        let mut accounts = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            accounts.push(self.process_account(assignment).await?);
        }

        Ok(RunReport {
            mode: self.config.mode,
            started_at,
            finished_at: Utc::now(),
            accounts,
        })
    }

    async fn process_account(
        &self,
        assignment: &AccountAssignment,
    ) -> Result<AccountReport, FatalError> {
        let account_id = assignment.account_id.as_str();
        info!(
            "Processing account {account_id}: {} role(s)",
            assignment.roles.len()
        );
        let control = self
            .broker
            .control_credential(&self.config.session_label)
            .await?;

        let mut report = AccountReport {
            account_id: account_id.to_string(),
            roles: Vec::with_capacity(assignment.roles.len()),
            archive: None,
            error: None,
        };

        for (index, role_name) in assignment.roles.iter().enumerate() {
            if self.config.is_protected(role_name) {
                error!(
                    "CRITICAL: refusing to process protected role {role_name} in account {account_id}"
                );
                let refusal = DecommissionError::ProtectedRole {
                    account_id: account_id.to_string(),
                    role_name: role_name.clone(),
                };
                report
                    .roles
                    .push(RoleReport::new(role_name, RoleDisposition::Protected).with_error(refusal));
                continue;
            }

            let credential = match self.target_credential(&control, account_id).await {
                Ok(credential) => credential,
                Err(e) => {
                    let failure = e.escalate(account_id)?;
                    error!("{failure}; skipping remaining roles in account {account_id}");
                    for skipped in &assignment.roles[index..] {
                        report.roles.push(
                            RoleReport::new(skipped, RoleDisposition::Skipped)
                                .with_error(&failure),
                        );
                    }
                    report.error = Some(failure.to_string());
                    break;
                }
            };

            let role_report = match self.process_role(&credential, account_id, role_name).await {
                Ok(role_report) => role_report,
                Err(e) => {
                    error!("{e}; skipping role {role_name} in account {account_id}");
                    RoleReport::new(role_name, RoleDisposition::Failed).with_error(e)
                }
            };
            report.roles.push(role_report);
        }

        match self.store.archive_account(account_id).await {
            Ok(archive) => report.archive = archive,
            Err(e) => {
                error!("Failed to archive backups for account {account_id}: {e}");
                report.error.get_or_insert_with(|| e.to_string());
            }
        }
        Ok(report)
    }

    /// A fresh delegation-role credential for one unit of work.
    async fn target_credential(
        &self,
        control: &AccountCredential,
        account_id: &str,
    ) -> Result<AccountCredential, DelegationError> {
        self.broker
            .obtain(
                account_id,
                &self.config.delegation_role_name,
                &self.config.session_label,
                Some(control),
            )
            .await
    }

    /// inspect -> evaluate -> persist -> (delete mode) decommission
    async fn process_role(
        &self,
        credential: &AccountCredential,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleReport, DecommissionError> {
        info!("Processing role {role_name} in account {account_id}");
        let iam = self.connector.connect(credential);
        let now = Utc::now();

        let snapshot = match RoleInspector::new(iam.clone(), account_id)
            .inspect(role_name, now)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                info!("Role {role_name} not found in account {account_id}, skipping");
                return Ok(RoleReport::new(role_name, RoleDisposition::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        let verdict = evaluate(&snapshot.role, self.config.threshold_days, now);
        info!("Role {role_name} in account {account_id} is {verdict}");
        if !verdict.eligible {
            let mut report = RoleReport::new(role_name, RoleDisposition::NotEligible);
            report.verdict = Some(verdict);
            return Ok(report);
        }

        let artifact = self
            .store
            .persist(&snapshot, account_id, role_name)
            .await
            .map_err(|source| DecommissionError::Backup {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
                source,
            })?;

        let mut report = RoleReport::new(role_name, RoleDisposition::BackedUp);
        report.verdict = Some(verdict);
        report.backup = Some(artifact);
        if !self.config.mode.is_destructive() {
            info!(
                "Backup-only mode: role {role_name} in account {account_id} left in place"
            );
            return Ok(report);
        }

        let outcome = RoleDecommissioner::new(iam, account_id, self.config.threshold_days)
            .decommission(role_name, &snapshot, Utc::now())
            .await;
        report.disposition = if outcome.succeeded {
            RoleDisposition::Decommissioned
        } else if outcome.role_not_found {
            RoleDisposition::NotFound
        } else {
            if let Some(backup) = &report.backup {
                warn!(
                    "Teardown of role {role_name} in account {account_id} incomplete; backup at {}",
                    backup.remote_location
                );
            }
            RoleDisposition::DeletionFailed
        };
        report.error.clone_from(&outcome.error);
        report.deletion = Some(outcome);
        Ok(report)
    }

    /// Collect and evaluate one role without writing or deleting anything.
    ///
    /// The outer error aborts; the inner one is scoped to this role.
    pub async fn inspect_role(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<Result<InspectionReport, DecommissionError>, FatalError> {
        if self.config.is_protected(role_name) {
            return Ok(Err(DecommissionError::ProtectedRole {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            }));
        }
        let control = self
            .broker
            .control_credential(&self.config.session_label)
            .await?;
        let credential = match self.target_credential(&control, account_id).await {
            Ok(credential) => credential,
            Err(e) => return e.escalate(account_id).map(Err),
        };

        let now = Utc::now();
        let iam = self.connector.connect(&credential);
        let snapshot = match RoleInspector::new(iam, account_id)
            .inspect(role_name, now)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => return Ok(Err(e.into())),
        };
        let verdict = evaluate(&snapshot.role, self.config.threshold_days, now);
        Ok(Ok(InspectionReport { verdict, snapshot }))
    }
}
