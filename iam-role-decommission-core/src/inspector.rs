//! Role inspection: builds a complete [`RoleSnapshot`] or fails
//!
//! Each sub-collection is all-or-nothing. A partial policy list would give
//! false confidence in the backup, so a single failed policy fails the whole
//! section, and every listing is paged until IAM reports no more pages.

use crate::aws::arn::is_platform_policy;
use crate::aws::iam_client::{
    decode_policy_document, AttachedPolicyRef, IamApi, InstanceProfileRecord, Page, RoleRecord,
};
use crate::aws::{AwsError, AwsResult};
use crate::error::{InspectError, SnapshotSection};
use crate::snapshot::{
    InstanceProfile, ManagedPolicies, ManagedPolicy, RoleIdentity, RoleSnapshot, Tag,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Drain a paginated listing.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> AwsResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = AwsResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut marker = None;
    loop {
        let page = fetch(marker.take()).await?;
        items.extend(page.items);
        match page.marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }
    Ok(items)
}

/// Names of the attributes in `required` whose value is missing.
fn missing_attributes(required: &[(&'static str, bool)]) -> Vec<&'static str> {
    required
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect()
}

pub struct RoleInspector {
    iam: Arc<dyn IamApi>,
    account_id: String,
}

impl RoleInspector {
    pub fn new(iam: Arc<dyn IamApi>, account_id: impl Into<String>) -> Self {
        Self {
            iam,
            account_id: account_id.into(),
        }
    }

    fn protocol(&self, role_name: &str, section: SnapshotSection, detail: String) -> InspectError {
        error!(
            "CRITICAL: {section} for role {role_name} in account {}: {detail}",
            self.account_id
        );
        InspectError::Protocol {
            account_id: self.account_id.clone(),
            role_name: role_name.to_string(),
            section,
            detail,
        }
    }

    fn collection(&self, role_name: &str, section: SnapshotSection, source: AwsError) -> InspectError {
        error!(
            "CRITICAL: failed to collect {section} for role {role_name} in account {}: {source}",
            self.account_id
        );
        InspectError::Collection {
            account_id: self.account_id.clone(),
            role_name: role_name.to_string(),
            section,
            source,
        }
    }

    /// Retrieve the complete configuration of `role_name`.
    pub async fn inspect(
        &self,
        role_name: &str,
        collected_at: DateTime<Utc>,
    ) -> Result<RoleSnapshot, InspectError> {
        info!(
            "Collecting snapshot of role {role_name} in account {}",
            self.account_id
        );
        let (role, trust_policy) = self.describe_role(role_name).await?;
        let tags = self.role_tags(role_name).await?;
        let managed_policies = self.attached_policies(role_name).await?;
        let inline_policies = self.inline_policies(role_name).await?;
        let instance_profiles = self.instance_profiles(role_name).await?;

        info!(
            "Collected role {role_name} in account {}: {} managed, {} inline policies, {} instance profiles, {} tags",
            self.account_id,
            managed_policies.len(),
            inline_policies.len(),
            instance_profiles.len(),
            tags.len()
        );

        Ok(RoleSnapshot {
            account_id: self.account_id.clone(),
            collected_at,
            role,
            trust_policy,
            tags,
            managed_policies,
            inline_policies,
            instance_profiles,
        })
    }

    /// Core metadata plus decoded trust policy.
    pub async fn describe_role(&self, role_name: &str) -> Result<(RoleIdentity, Value), InspectError> {
        let record = match self.iam.get_role(role_name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                info!(
                    "Role {role_name} not found in account {}",
                    self.account_id
                );
                return Err(InspectError::NotFound {
                    account_id: self.account_id.clone(),
                    role_name: role_name.to_string(),
                });
            }
            Err(e) => return Err(self.collection(role_name, SnapshotSection::Role, e)),
        };

        let RoleRecord {
            arn: Some(arn),
            role_name: Some(fetched_name),
            path: Some(path),
            role_id: Some(role_id),
            create_date: Some(created_at),
            assume_role_policy_document: Some(trust_document),
            description,
            max_session_duration,
            permissions_boundary,
            last_used_date,
            last_used_region,
        } = record
        else {
            let missing = missing_attributes(&[
                ("Arn", record.arn.is_some()),
                ("RoleName", record.role_name.is_some()),
                ("Path", record.path.is_some()),
                ("RoleId", record.role_id.is_some()),
                ("CreateDate", record.create_date.is_some()),
                (
                    "AssumeRolePolicyDocument",
                    record.assume_role_policy_document.is_some(),
                ),
            ]);
            return Err(self.protocol(
                role_name,
                SnapshotSection::Role,
                format!("missing required attributes: {}", missing.join(", ")),
            ));
        };

        if fetched_name != role_name {
            return Err(self.protocol(
                role_name,
                SnapshotSection::Role,
                format!("GetRole returned role '{fetched_name}'"),
            ));
        }

        let trust_policy = decode_policy_document(&trust_document).map_err(|e| {
            self.protocol(
                role_name,
                SnapshotSection::Role,
                format!("unreadable trust policy: {e}"),
            )
        })?;

        Ok((
            RoleIdentity {
                name: fetched_name,
                arn,
                role_id,
                path,
                created_at,
                last_used_at: last_used_date,
                last_used_region,
                description,
                max_session_duration,
                permissions_boundary,
            },
            trust_policy,
        ))
    }

    async fn role_tags(&self, role_name: &str) -> Result<Vec<Tag>, InspectError> {
        collect_pages(|marker| self.iam.list_role_tags(role_name, marker))
            .await
            .map_err(|e| self.collection(role_name, SnapshotSection::Tags, e))
    }

    async fn attached_policies(&self, role_name: &str) -> Result<ManagedPolicies, InspectError> {
        let section = SnapshotSection::AttachedPolicies;
        let attached = collect_pages(|marker| self.iam.list_attached_role_policies(role_name, marker))
            .await
            .map_err(|e| self.collection(role_name, section, e))?;

        let mut policies = ManagedPolicies::default();
        for reference in attached {
            let AttachedPolicyRef {
                policy_name: Some(name),
                policy_arn: Some(arn),
            } = reference
            else {
                return Err(self.protocol(
                    role_name,
                    section,
                    "attached policy without PolicyName or PolicyArn".to_string(),
                ));
            };

            let policy = self.resolve_managed_policy(role_name, &arn).await?;
            debug!("Resolved policy {name} ({arn}) at version {}", policy.version_id);
            if is_platform_policy(&arn) {
                policies.platform.insert(name, policy);
            } else {
                policies.customer.insert(name, policy);
            }
        }
        Ok(policies)
    }

    /// Fetch a managed policy and the document of its current version.
    async fn resolve_managed_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<ManagedPolicy, InspectError> {
        let section = SnapshotSection::AttachedPolicies;
        let record = self
            .iam
            .get_policy(policy_arn)
            .await
            .map_err(|e| self.collection(role_name, section, e))?;

        let Some(version_id) = record.default_version_id else {
            return Err(self.protocol(
                role_name,
                section,
                format!("policy {policy_arn} has no default version"),
            ));
        };

        let encoded = self
            .iam
            .get_policy_version(policy_arn, &version_id)
            .await
            .map_err(|e| self.collection(role_name, section, e))?
            .ok_or_else(|| {
                self.protocol(
                    role_name,
                    section,
                    format!("policy {policy_arn} version {version_id} has no document"),
                )
            })?;

        let document = decode_policy_document(&encoded).map_err(|e| {
            self.protocol(
                role_name,
                section,
                format!("policy {policy_arn} version {version_id}: {e}"),
            )
        })?;

        Ok(ManagedPolicy {
            arn: record.arn.unwrap_or_else(|| policy_arn.to_string()),
            policy_id: record.policy_id,
            path: record.path,
            description: record.description,
            tags: record.tags,
            version_id,
            document,
            permissions_boundary_usage_count: record.permissions_boundary_usage_count,
            attachment_count: record.attachment_count,
            created_at: record.create_date,
        })
    }

    async fn inline_policies(&self, role_name: &str) -> Result<BTreeMap<String, Value>, InspectError> {
        let section = SnapshotSection::InlinePolicies;
        let names = collect_pages(|marker| self.iam.list_role_policies(role_name, marker))
            .await
            .map_err(|e| self.collection(role_name, section, e))?;

        let mut policies = BTreeMap::new();
        for name in names {
            let encoded = self
                .iam
                .get_role_policy(role_name, &name)
                .await
                .map_err(|e| self.collection(role_name, section, e))?
                .ok_or_else(|| {
                    self.protocol(
                        role_name,
                        section,
                        format!("inline policy {name} has no document"),
                    )
                })?;
            let document = decode_policy_document(&encoded).map_err(|e| {
                self.protocol(role_name, section, format!("inline policy {name}: {e}"))
            })?;
            policies.insert(name, document);
        }
        Ok(policies)
    }

    async fn instance_profiles(&self, role_name: &str) -> Result<Vec<InstanceProfile>, InspectError> {
        let section = SnapshotSection::InstanceProfiles;
        let records =
            collect_pages(|marker| self.iam.list_instance_profiles_for_role(role_name, marker))
                .await
                .map_err(|e| self.collection(role_name, section, e))?;

        records
            .into_iter()
            .map(|record| {
                let InstanceProfileRecord {
                    arn: Some(arn),
                    instance_profile_name: Some(name),
                    instance_profile_id: Some(id),
                    path: Some(path),
                    role_names: Some(role_names),
                    create_date,
                } = record
                else {
                    let missing = missing_attributes(&[
                        ("Arn", record.arn.is_some()),
                        ("InstanceProfileName", record.instance_profile_name.is_some()),
                        ("InstanceProfileId", record.instance_profile_id.is_some()),
                        ("Path", record.path.is_some()),
                        ("Roles", record.role_names.is_some()),
                    ]);
                    return Err(self.protocol(
                        role_name,
                        section,
                        format!("incomplete instance profile, missing: {}", missing.join(", ")),
                    ));
                };
                Ok(InstanceProfile {
                    arn,
                    name,
                    id,
                    path,
                    role_names,
                    created_at: create_date,
                })
            })
            .collect()
    }
}
