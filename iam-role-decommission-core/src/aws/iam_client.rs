//! AWS IAM client wrapper for role inspection and teardown
//!
//! [`IamApi`] is the narrow slice of IAM the pipeline needs. List operations
//! are exposed one page at a time so callers decide how pages are exhausted.

use crate::aws::credentials::AccountCredential;
use crate::aws::{to_utc, AwsError, AwsResult};
use crate::snapshot::{PermissionsBoundary, Tag};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::Client as IamClient;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

const NO_SUCH_ENTITY: &str = "NoSuchEntity";

/// One page of a paginated IAM listing. `marker` is set only when more
/// pages remain.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub marker: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            marker: None,
        }
    }
}

/// Role metadata as returned by GetRole. Every field is optional so that a
/// response violating the API contract can be detected instead of defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleRecord {
    pub arn: Option<String>,
    pub role_name: Option<String>,
    pub path: Option<String>,
    pub role_id: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    /// URL-encoded JSON, as IAM returns it
    pub assume_role_policy_document: Option<String>,
    pub description: Option<String>,
    pub max_session_duration: Option<i32>,
    pub permissions_boundary: Option<PermissionsBoundary>,
    pub last_used_date: Option<DateTime<Utc>>,
    pub last_used_region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedPolicyRef {
    pub policy_name: Option<String>,
    pub policy_arn: Option<String>,
}

/// Managed policy metadata as returned by GetPolicy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRecord {
    pub arn: Option<String>,
    pub policy_id: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub default_version_id: Option<String>,
    pub permissions_boundary_usage_count: Option<i32>,
    pub attachment_count: Option<i32>,
    pub create_date: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceProfileRecord {
    pub arn: Option<String>,
    pub instance_profile_name: Option<String>,
    pub instance_profile_id: Option<String>,
    pub path: Option<String>,
    pub role_names: Option<Vec<String>>,
    pub create_date: Option<DateTime<Utc>>,
}

/// IAM operations used by the inspector and the decommissioner.
///
/// `NoSuchEntity` responses surface as [`AwsError::NoSuchEntity`].
#[async_trait]
pub trait IamApi: Send + Sync {
    async fn get_role(&self, role_name: &str) -> AwsResult<RoleRecord>;

    async fn list_role_tags(&self, role_name: &str, marker: Option<String>)
        -> AwsResult<Page<Tag>>;

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<AttachedPolicyRef>>;

    async fn get_policy(&self, policy_arn: &str) -> AwsResult<PolicyRecord>;

    /// URL-encoded document of one policy version.
    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> AwsResult<Option<String>>;

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<String>>;

    /// URL-encoded document of one inline policy.
    async fn get_role_policy(&self, role_name: &str, policy_name: &str)
        -> AwsResult<Option<String>>;

    async fn list_instance_profiles_for_role(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<InstanceProfileRecord>>;

    async fn remove_role_from_instance_profile(
        &self,
        instance_profile_name: &str,
        role_name: &str,
    ) -> AwsResult<()>;

    async fn delete_instance_profile(&self, instance_profile_name: &str) -> AwsResult<()>;

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> AwsResult<()>;

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> AwsResult<()>;

    async fn delete_role(&self, role_name: &str) -> AwsResult<()>;
}

/// Builds an [`IamApi`] bound to one verified account credential.
pub trait IamConnector: Send + Sync {
    fn connect(&self, credential: &AccountCredential) -> Arc<dyn IamApi>;
}

/// Connector producing SDK-backed clients.
pub struct SdkIamConnector {
    region: Region,
}

impl SdkIamConnector {
    pub fn new(region: &str) -> Self {
        Self {
            region: Region::new(region.to_string()),
        }
    }
}

impl IamConnector for SdkIamConnector {
    fn connect(&self, credential: &AccountCredential) -> Arc<dyn IamApi> {
        let config = aws_sdk_iam::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(self.region.clone())
            .credentials_provider(credential.to_sdk_credentials())
            .build();
        Arc::new(AwsIamClient::new(IamClient::from_conf(config)))
    }
}

pub struct AwsIamClient {
    client: IamClient,
}

impl AwsIamClient {
    pub fn new(client: IamClient) -> Self {
        Self { client }
    }
}

/// Map an SDK failure, keeping `NoSuchEntity` distinguishable.
fn iam_failure<E, R>(operation: &str, subject: &str, err: &SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(ProvideErrorMetadata::code);
    if code == Some(NO_SUCH_ENTITY) {
        AwsError::NoSuchEntity(format!("{operation}: {subject}"))
    } else {
        AwsError::IamError(format!(
            "{operation} failed for '{subject}': {}",
            DisplayErrorContext(err)
        ))
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn convert_tags(tags: &[aws_sdk_iam::types::Tag]) -> Vec<Tag> {
    tags.iter()
        .map(|t| Tag::new(t.key(), t.value()))
        .collect()
}

#[async_trait]
impl IamApi for AwsIamClient {
    async fn get_role(&self, role_name: &str) -> AwsResult<RoleRecord> {
        let response = self
            .client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| iam_failure("GetRole", role_name, &e))?;

        let Some(role) = response.role() else {
            return Ok(RoleRecord::default());
        };

        let last_used = role.role_last_used();
        Ok(RoleRecord {
            arn: non_empty(role.arn()),
            role_name: non_empty(role.role_name()),
            path: non_empty(role.path()),
            role_id: non_empty(role.role_id()),
            create_date: to_utc(role.create_date()),
            assume_role_policy_document: role
                .assume_role_policy_document()
                .map(str::to_string),
            description: role.description().map(str::to_string),
            max_session_duration: role.max_session_duration(),
            permissions_boundary: role.permissions_boundary().map(|b| PermissionsBoundary {
                arn: b.permissions_boundary_arn().map(str::to_string),
                boundary_type: b
                    .permissions_boundary_type()
                    .map(|t| t.as_str().to_string()),
            }),
            last_used_date: last_used
                .and_then(|u| u.last_used_date())
                .and_then(to_utc),
            last_used_region: last_used.and_then(|u| u.region()).map(str::to_string),
        })
    }

    async fn list_role_tags(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<Tag>> {
        let response = self
            .client
            .list_role_tags()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| iam_failure("ListRoleTags", role_name, &e))?;

        Ok(Page {
            items: convert_tags(response.tags()),
            marker: next_marker(
                "ListRoleTags",
                role_name,
                response.is_truncated(),
                response.marker(),
            )?,
        })
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<AttachedPolicyRef>> {
        let response = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| iam_failure("ListAttachedRolePolicies", role_name, &e))?;

        let items = response
            .attached_policies()
            .iter()
            .map(|p| AttachedPolicyRef {
                policy_name: p.policy_name().map(str::to_string),
                policy_arn: p.policy_arn().map(str::to_string),
            })
            .collect();
        Ok(Page {
            items,
            marker: next_marker(
                "ListAttachedRolePolicies",
                role_name,
                response.is_truncated(),
                response.marker(),
            )?,
        })
    }

    async fn get_policy(&self, policy_arn: &str) -> AwsResult<PolicyRecord> {
        let response = self
            .client
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| iam_failure("GetPolicy", policy_arn, &e))?;

        let Some(policy) = response.policy() else {
            return Ok(PolicyRecord::default());
        };
        Ok(PolicyRecord {
            arn: policy.arn().map(str::to_string),
            policy_id: policy.policy_id().map(str::to_string),
            path: policy.path().map(str::to_string),
            description: policy.description().map(str::to_string),
            default_version_id: policy.default_version_id().map(str::to_string),
            permissions_boundary_usage_count: policy.permissions_boundary_usage_count(),
            attachment_count: policy.attachment_count(),
            create_date: policy.create_date().and_then(to_utc),
            tags: convert_tags(policy.tags()),
        })
    }

    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> AwsResult<Option<String>> {
        let response = self
            .client
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| iam_failure("GetPolicyVersion", policy_arn, &e))?;

        Ok(response
            .policy_version()
            .and_then(|v| v.document())
            .map(str::to_string))
    }

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<String>> {
        let response = self
            .client
            .list_role_policies()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| iam_failure("ListRolePolicies", role_name, &e))?;

        Ok(Page {
            items: response.policy_names().to_vec(),
            marker: next_marker(
                "ListRolePolicies",
                role_name,
                response.is_truncated(),
                response.marker(),
            )?,
        })
    }

    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> AwsResult<Option<String>> {
        let response = self
            .client
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| iam_failure("GetRolePolicy", policy_name, &e))?;

        Ok(non_empty(response.policy_document()))
    }

    async fn list_instance_profiles_for_role(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<InstanceProfileRecord>> {
        let response = self
            .client
            .list_instance_profiles_for_role()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| iam_failure("ListInstanceProfilesForRole", role_name, &e))?;

        let items = response
            .instance_profiles()
            .iter()
            .map(|p| InstanceProfileRecord {
                arn: non_empty(p.arn()),
                instance_profile_name: non_empty(p.instance_profile_name()),
                instance_profile_id: non_empty(p.instance_profile_id()),
                path: non_empty(p.path()),
                role_names: Some(
                    p.roles()
                        .iter()
                        .map(|r| r.role_name().to_string())
                        .collect(),
                ),
                create_date: to_utc(p.create_date()),
            })
            .collect();
        Ok(Page {
            items,
            marker: next_marker(
                "ListInstanceProfilesForRole",
                role_name,
                response.is_truncated(),
                response.marker(),
            )?,
        })
    }

    async fn remove_role_from_instance_profile(
        &self,
        instance_profile_name: &str,
        role_name: &str,
    ) -> AwsResult<()> {
        self.client
            .remove_role_from_instance_profile()
            .instance_profile_name(instance_profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| iam_failure("RemoveRoleFromInstanceProfile", instance_profile_name, &e))?;
        Ok(())
    }

    async fn delete_instance_profile(&self, instance_profile_name: &str) -> AwsResult<()> {
        self.client
            .delete_instance_profile()
            .instance_profile_name(instance_profile_name)
            .send()
            .await
            .map_err(|e| iam_failure("DeleteInstanceProfile", instance_profile_name, &e))?;
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> AwsResult<()> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| iam_failure("DetachRolePolicy", policy_arn, &e))?;
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> AwsResult<()> {
        self.client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| iam_failure("DeleteRolePolicy", policy_name, &e))?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> AwsResult<()> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| iam_failure("DeleteRole", role_name, &e))?;
        Ok(())
    }
}

/// Marker for the next page. A truncated page without a marker cannot be
/// continued, and stopping there would pass a partial listing off as complete.
fn next_marker(
    operation: &str,
    subject: &str,
    is_truncated: bool,
    marker: Option<&str>,
) -> AwsResult<Option<String>> {
    match (is_truncated, marker) {
        (false, _) => Ok(None),
        (true, Some(marker)) if !marker.is_empty() => Ok(Some(marker.to_string())),
        (true, _) => Err(AwsError::IamError(format!(
            "{operation} for '{subject}' returned a truncated page without a marker"
        ))),
    }
}

/// Decode a policy document as IAM returns it (URL-encoded JSON) into an
/// opaque JSON value.
pub fn decode_policy_document(encoded: &str) -> AwsResult<Value> {
    let decoded = percent_encoding::percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| AwsError::PolicyError(format!("Failed to URL decode policy document: {e}")))?;

    serde_json::from_str(&decoded)
        .map_err(|e| AwsError::PolicyError(format!("Failed to parse policy document JSON: {e}")))
}
