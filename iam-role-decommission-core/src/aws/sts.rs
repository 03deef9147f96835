//! STS helpers for role assumption and caller identity

use crate::aws::credentials::{AccountCredential, IssuedCredential};
use crate::aws::{to_utc, AwsError, AwsResult};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use secrecy::SecretString;

/// The credential delegation protocol consumed by the broker.
///
/// `upstream = None` means "the ambient process identity".
#[async_trait]
pub trait DelegationService: Send + Sync {
    /// Assume `role_arn`. `Ok(None)` means the call succeeded but no
    /// credentials came back.
    async fn assume_role(
        &self,
        upstream: Option<&AccountCredential>,
        role_arn: &str,
        session_label: &str,
    ) -> AwsResult<Option<IssuedCredential>>;

    /// Account id that `credential` actually authenticates as.
    async fn who_am_i(&self, credential: &IssuedCredential) -> AwsResult<String>;
}

/// STS-backed delegation using the AWS SDK.
pub struct SdkDelegation {
    ambient: SdkConfig,
    region: Region,
}

impl SdkDelegation {
    /// Load the ambient (instance / workload) identity through the standard
    /// credential provider chain.
    pub async fn from_environment(region: &str) -> Self {
        let region = Region::new(region.to_string());
        let ambient = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;
        Self { ambient, region }
    }

    /// The loaded ambient configuration, shared with other ambient clients.
    pub fn ambient_config(&self) -> &SdkConfig {
        &self.ambient
    }

    fn client_with(&self, credentials: aws_credential_types::Credentials) -> StsClient {
        let config = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(self.region.clone())
            .credentials_provider(credentials)
            .build();
        StsClient::from_conf(config)
    }
}

#[async_trait]
impl DelegationService for SdkDelegation {
    async fn assume_role(
        &self,
        upstream: Option<&AccountCredential>,
        role_arn: &str,
        session_label: &str,
    ) -> AwsResult<Option<IssuedCredential>> {
        let client = match upstream {
            Some(credential) => self.client_with(credential.to_sdk_credentials()),
            None => StsClient::new(&self.ambient),
        };

        let out = client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_label)
            .send()
            .await
            .map_err(|e| {
                AwsError::SdkError(format!(
                    "STS AssumeRole failed for {role_arn}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(out.credentials().map(|c| IssuedCredential {
            access_key_id: c.access_key_id().to_string(),
            secret_access_key: SecretString::new(c.secret_access_key().to_string()),
            session_token: SecretString::new(c.session_token().to_string()),
            expires_at: to_utc(c.expiration()),
        }))
    }

    async fn who_am_i(&self, credential: &IssuedCredential) -> AwsResult<String> {
        caller_account_id(&self.client_with(credential.to_sdk_credentials())).await
    }
}

/// Return the current caller account ID using STS GetCallerIdentity.
pub async fn caller_account_id(client: &StsClient) -> AwsResult<String> {
    let out = client
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| {
            AwsError::SdkError(format!(
                "STS GetCallerIdentity failed: {}",
                DisplayErrorContext(&e)
            ))
        })?;
    let acct = out
        .account()
        .map(std::string::ToString::to_string)
        .ok_or_else(|| AwsError::SdkError("STS GetCallerIdentity missing Account".to_string()))?;
    Ok(acct)
}
