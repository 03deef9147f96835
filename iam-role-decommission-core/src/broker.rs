//! Chained credential delegation: ambient identity -> control account -> target account
//!
//! Every assumption is followed by an independent GetCallerIdentity against
//! the new credential; the returned account must match the expected one.

use crate::aws::arn::{extract_account_from_arn, role_arn};
use crate::aws::credentials::AccountCredential;
use crate::aws::sts::DelegationService;
use crate::error::{DelegationError, DelegationFailure, DelegationHop, FatalError};
use log::{debug, error, info};
use std::sync::Arc;

pub struct CredentialBroker {
    delegation: Arc<dyn DelegationService>,
    control_role_arn: String,
    control_account_id: String,
}

impl CredentialBroker {
    pub fn new(
        delegation: Arc<dyn DelegationService>,
        control_role_arn: impl Into<String>,
    ) -> Result<Self, FatalError> {
        let control_role_arn = control_role_arn.into();
        let control_account_id = extract_account_from_arn(&control_role_arn).ok_or_else(|| {
            FatalError::configuration(format!(
                "control role ARN '{control_role_arn}' does not carry a 12-digit account id"
            ))
        })?;
        Ok(Self {
            delegation,
            control_role_arn,
            control_account_id,
        })
    }

    pub fn control_account_id(&self) -> &str {
        &self.control_account_id
    }

    /// Assume the control-account role with the process's ambient identity.
    /// Any failure here is fatal: no further work is possible without it.
    pub async fn control_credential(
        &self,
        session_label: &str,
    ) -> Result<AccountCredential, FatalError> {
        info!(
            "Assuming control role {} (account {})",
            self.control_role_arn, self.control_account_id
        );
        self.assume_verified(
            DelegationHop::Control,
            None,
            &self.control_role_arn,
            &self.control_account_id,
            session_label,
        )
        .await
        .map_err(|e| {
            error!("{e}");
            FatalError::Delegation(e)
        })
    }

    /// Obtain a credential for `role_name` in `target_account_id`.
    ///
    /// Without an upstream credential the control hop is performed first.
    pub async fn obtain(
        &self,
        target_account_id: &str,
        role_name: &str,
        session_label: &str,
        upstream: Option<&AccountCredential>,
    ) -> Result<AccountCredential, DelegationError> {
        let control;
        let upstream = match upstream {
            Some(credential) => credential,
            None => {
                debug!("No upstream credential supplied, assuming control role first");
                control = self
                    .assume_verified(
                        DelegationHop::Control,
                        None,
                        &self.control_role_arn,
                        &self.control_account_id,
                        session_label,
                    )
                    .await?;
                &control
            }
        };

        let target_arn = role_arn(target_account_id, role_name);
        info!("Assuming {target_arn} for account {target_account_id}");
        self.assume_verified(
            DelegationHop::Target,
            Some(upstream),
            &target_arn,
            target_account_id,
            session_label,
        )
        .await
    }

    async fn assume_verified(
        &self,
        hop: DelegationHop,
        upstream: Option<&AccountCredential>,
        role_arn: &str,
        expected_account: &str,
        session_label: &str,
    ) -> Result<AccountCredential, DelegationError> {
        let fail = |failure| DelegationError {
            hop,
            role_arn: role_arn.to_string(),
            failure,
        };

        let issued = self
            .delegation
            .assume_role(upstream, role_arn, session_label)
            .await
            .map_err(|e| fail(DelegationFailure::Denied(e)))?
            .ok_or_else(|| fail(DelegationFailure::MissingCredentials))?;

        let actual = self
            .delegation
            .who_am_i(&issued)
            .await
            .map_err(|e| fail(DelegationFailure::IdentityCheck(e)))?;

        if actual != expected_account {
            error!(
                "CRITICAL: credential for {role_arn} belongs to account {actual}, expected {expected_account}"
            );
            return Err(fail(DelegationFailure::IdentityMismatch {
                expected: expected_account.to_string(),
                actual,
            }));
        }

        debug!("Verified {hop} credential for account {actual}");
        Ok(AccountCredential::verified(issued, actual))
    }
}
