//! In-memory doubles for the AWS seams

use crate::aws::arn::extract_account_from_arn;
use crate::aws::credentials::{AccountCredential, IssuedCredential};
use crate::aws::iam_client::{
    AttachedPolicyRef, IamApi, IamConnector, InstanceProfileRecord, Page, PolicyRecord, RoleRecord,
};
use crate::aws::s3::ObjectSink;
use crate::aws::sts::DelegationService;
use crate::aws::{AwsError, AwsResult};
use crate::snapshot::Tag;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

const KEY_PREFIX: &str = "ASIA-";

/// Percent-encode a JSON document the way IAM returns policy documents.
pub(crate) fn url_encode(document: &serde_json::Value) -> String {
    percent_encoding::utf8_percent_encode(
        &document.to_string(),
        percent_encoding::NON_ALPHANUMERIC,
    )
    .to_string()
}

/// STS double. Issued access keys embed the assumed role ARN so that
/// `who_am_i` can answer with the account of that ARN.
#[derive(Default)]
pub(crate) struct FakeDelegation {
    assumed: Mutex<Vec<(Option<String>, String)>>,
    identity_overrides: HashMap<String, String>,
    denied: HashSet<String>,
    empty: HashSet<String>,
}

impl FakeDelegation {
    pub(crate) fn with_identity_override(mut self, role_arn: &str, account_id: &str) -> Self {
        self.identity_overrides
            .insert(role_arn.to_string(), account_id.to_string());
        self
    }

    pub(crate) fn with_denied(mut self, role_arn: &str) -> Self {
        self.denied.insert(role_arn.to_string());
        self
    }

    pub(crate) fn with_empty_response(mut self, role_arn: &str) -> Self {
        self.empty.insert(role_arn.to_string());
        self
    }

    /// (upstream account id, role ARN) of every AssumeRole call, in order.
    pub(crate) fn assumed(&self) -> Vec<(Option<String>, String)> {
        self.assumed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DelegationService for FakeDelegation {
    async fn assume_role(
        &self,
        upstream: Option<&AccountCredential>,
        role_arn: &str,
        _session_label: &str,
    ) -> AwsResult<Option<IssuedCredential>> {
        self.assumed.lock().expect("lock").push((
            upstream.map(|c| c.account_id().to_string()),
            role_arn.to_string(),
        ));
        if self.denied.contains(role_arn) {
            return Err(AwsError::SdkError(format!("AccessDenied: {role_arn}")));
        }
        if self.empty.contains(role_arn) {
            return Ok(None);
        }
        Ok(Some(IssuedCredential {
            access_key_id: format!("{KEY_PREFIX}{role_arn}"),
            secret_access_key: SecretString::new("secret".to_string()),
            session_token: SecretString::new("token".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }))
    }

    async fn who_am_i(&self, credential: &IssuedCredential) -> AwsResult<String> {
        let role_arn = credential
            .access_key_id
            .strip_prefix(KEY_PREFIX)
            .unwrap_or_default();
        if let Some(account) = self.identity_overrides.get(role_arn) {
            return Ok(account.clone());
        }
        extract_account_from_arn(role_arn)
            .ok_or_else(|| AwsError::SdkError(format!("unknown credential {role_arn}")))
    }
}

/// A role as held by [`FakeIam`], in IAM's wire shapes.
#[derive(Debug, Clone)]
pub(crate) struct FakeRole {
    pub(crate) record: RoleRecord,
    pub(crate) tags: Vec<Tag>,
    pub(crate) attached: Vec<AttachedPolicyRef>,
    /// Managed policies referenced by `attached`: record and default
    /// version document (URL-encoded).
    pub(crate) policies: Vec<(PolicyRecord, String)>,
    /// Inline policy name to URL-encoded document. Empty means "no document".
    pub(crate) inline_policies: BTreeMap<String, String>,
    pub(crate) instance_profiles: Vec<InstanceProfileRecord>,
}

impl FakeRole {
    /// A role created 40 days before `now` and never used, with one platform
    /// and two customer policies, one inline policy, one instance profile
    /// and two tags.
    pub(crate) fn populated(name: &str, now: DateTime<Utc>) -> Self {
        let trust = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Service": "ec2.amazonaws.com"},
                "Action": "sts:AssumeRole"
            }]
        });
        let created = now - Duration::days(40);

        let policy = |arn: &str, version: &str, action: &str| {
            let record = PolicyRecord {
                arn: Some(arn.to_string()),
                policy_id: Some("ANPAEXAMPLE".to_string()),
                path: Some("/".to_string()),
                description: None,
                default_version_id: Some(version.to_string()),
                permissions_boundary_usage_count: Some(0),
                attachment_count: Some(1),
                create_date: Some(created),
                tags: Vec::new(),
            };
            let document = serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{"Effect": "Allow", "Action": action, "Resource": "*"}]
            });
            (record, url_encode(&document))
        };
        let attach = |policy_name: &str, arn: &str| AttachedPolicyRef {
            policy_name: Some(policy_name.to_string()),
            policy_arn: Some(arn.to_string()),
        };

        let readonly = "arn:aws:iam::aws:policy/ReadOnlyAccess";
        let app = "arn:aws:iam::123456789012:policy/app-policy";
        let app2 = "arn:aws:iam::123456789012:policy/app-policy-2";

        let mut inline_policies = BTreeMap::new();
        inline_policies.insert(
            "inline-logs".to_string(),
            url_encode(&serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{"Effect": "Allow", "Action": "logs:PutLogEvents", "Resource": "*"}]
            })),
        );

        Self {
            record: RoleRecord {
                arn: Some(format!("arn:aws:iam::123456789012:role/{name}")),
                role_name: Some(name.to_string()),
                path: Some("/".to_string()),
                role_id: Some("AROAEXAMPLEID".to_string()),
                create_date: Some(created),
                assume_role_policy_document: Some(url_encode(&trust)),
                description: Some("legacy workload".to_string()),
                max_session_duration: Some(3600),
                permissions_boundary: None,
                last_used_date: None,
                last_used_region: None,
            },
            tags: vec![Tag::new("team", "data"), Tag::new("env", "prod")],
            attached: vec![
                attach("ReadOnlyAccess", readonly),
                attach("app-policy", app),
                attach("app-policy-2", app2),
            ],
            policies: vec![
                policy(readonly, "v7", "s3:ListBucket"),
                policy(app, "v2", "sqs:SendMessage"),
                policy(app2, "v1", "sns:Publish"),
            ],
            inline_policies,
            instance_profiles: vec![InstanceProfileRecord {
                arn: Some(format!(
                    "arn:aws:iam::123456789012:instance-profile/{name}-profile"
                )),
                instance_profile_name: Some(format!("{name}-profile")),
                instance_profile_id: Some("AIPAEXAMPLE".to_string()),
                path: Some("/".to_string()),
                role_names: Some(vec![name.to_string()]),
                create_date: Some(created),
            }],
        }
    }

    /// Mark the role as last used `days_ago` days before `now`.
    pub(crate) fn last_used(mut self, days_ago: i64, now: DateTime<Utc>) -> Self {
        self.record.last_used_date = Some(now - Duration::days(days_ago));
        self.record.last_used_region = Some("us-east-1".to_string());
        self
    }

    fn name(&self) -> String {
        self.record.role_name.clone().unwrap_or_default()
    }
}

#[derive(Default)]
struct IamState {
    roles: BTreeMap<String, FakeRole>,
    policies: BTreeMap<String, (PolicyRecord, String)>,
    profiles_deleted: Vec<String>,
    calls: Vec<String>,
}

/// IAM double with real state transitions: teardown calls mutate the held
/// roles and `DeleteRole` refuses while anything is still attached.
#[derive(Default)]
pub(crate) struct FakeIam {
    state: Mutex<IamState>,
    page_size: Option<usize>,
    failing: HashSet<String>,
    ignore_deletes: bool,
}

const MUTATIONS: [&str; 5] = [
    "RemoveRoleFromInstanceProfile",
    "DeleteInstanceProfile",
    "DetachRolePolicy",
    "DeleteRolePolicy",
    "DeleteRole",
];

impl FakeIam {
    pub(crate) fn with_role(role: FakeRole) -> Self {
        Self::default().and_role(role)
    }

    pub(crate) fn and_role(self, role: FakeRole) -> Self {
        {
            let mut state = self.state.lock().expect("lock");
            for (record, document) in &role.policies {
                if let Some(arn) = &record.arn {
                    state
                        .policies
                        .insert(arn.clone(), (record.clone(), document.clone()));
                }
            }
            state.roles.insert(role.name(), role);
        }
        self
    }

    /// Serve list operations `size` items per page.
    pub(crate) fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Fail the call labelled `"<Operation> <subject>"` with a generic IAM error.
    pub(crate) fn failing_on(mut self, call: &str) -> Self {
        self.failing.insert(call.to_string());
        self
    }

    /// `DeleteRole` reports success but leaves the role in place.
    pub(crate) fn ignoring_deletes(mut self) -> Self {
        self.ignore_deletes = true;
        self
    }

    /// Every call made so far, as `"<Operation> <subject>"`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().expect("lock").calls.clone()
    }

    /// The calls that change IAM state.
    pub(crate) fn mutation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| MUTATIONS.iter().any(|m| call.split(' ').next() == Some(*m)))
            .collect()
    }

    pub(crate) fn has_role(&self, role_name: &str) -> bool {
        self.state.lock().expect("lock").roles.contains_key(role_name)
    }

    pub(crate) fn deleted_profiles(&self) -> Vec<String> {
        self.state.lock().expect("lock").profiles_deleted.clone()
    }

    /// Record the call and apply failure injection.
    fn enter(&self, operation: &str, subject: &str) -> AwsResult<std::sync::MutexGuard<'_, IamState>> {
        let label = format!("{operation} {subject}");
        let mut state = self.state.lock().expect("lock");
        state.calls.push(label.clone());
        if self.failing.contains(&label) {
            return Err(AwsError::IamError(format!("{label}: ServiceFailure")));
        }
        Ok(state)
    }

    fn page<T: Clone>(&self, items: &[T], marker: Option<String>) -> Page<T> {
        let start = marker.and_then(|m| m.parse::<usize>().ok()).unwrap_or(0);
        let size = self.page_size.unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(items.len());
        Page {
            items: items[start..end].to_vec(),
            marker: (end < items.len()).then(|| end.to_string()),
        }
    }
}

fn not_found(operation: &str, subject: &str) -> AwsError {
    AwsError::NoSuchEntity(format!("{operation}: {subject}"))
}

fn role_mut<'a>(
    state: &'a mut IamState,
    operation: &str,
    role_name: &str,
) -> AwsResult<&'a mut FakeRole> {
    state
        .roles
        .get_mut(role_name)
        .ok_or_else(|| not_found(operation, role_name))
}

#[async_trait]
impl IamApi for FakeIam {
    async fn get_role(&self, role_name: &str) -> AwsResult<RoleRecord> {
        let mut state = self.enter("GetRole", role_name)?;
        Ok(role_mut(&mut state, "GetRole", role_name)?.record.clone())
    }

    async fn list_role_tags(&self, role_name: &str, marker: Option<String>) -> AwsResult<Page<Tag>> {
        let mut state = self.enter("ListRoleTags", role_name)?;
        let role = role_mut(&mut state, "ListRoleTags", role_name)?;
        Ok(self.page(&role.tags, marker))
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<AttachedPolicyRef>> {
        let mut state = self.enter("ListAttachedRolePolicies", role_name)?;
        let role = role_mut(&mut state, "ListAttachedRolePolicies", role_name)?;
        Ok(self.page(&role.attached, marker))
    }

    async fn get_policy(&self, policy_arn: &str) -> AwsResult<PolicyRecord> {
        let state = self.enter("GetPolicy", policy_arn)?;
        state
            .policies
            .get(policy_arn)
            .map(|(record, _)| record.clone())
            .ok_or_else(|| not_found("GetPolicy", policy_arn))
    }

    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> AwsResult<Option<String>> {
        let state = self.enter("GetPolicyVersion", policy_arn)?;
        match state.policies.get(policy_arn) {
            Some((record, document))
                if record.default_version_id.as_deref() == Some(version_id) =>
            {
                Ok(Some(document.clone()))
            }
            _ => Err(not_found("GetPolicyVersion", policy_arn)),
        }
    }

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<String>> {
        let mut state = self.enter("ListRolePolicies", role_name)?;
        let role = role_mut(&mut state, "ListRolePolicies", role_name)?;
        let names: Vec<String> = role.inline_policies.keys().cloned().collect();
        Ok(self.page(&names, marker))
    }

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> AwsResult<Option<String>> {
        let mut state = self.enter("GetRolePolicy", policy_name)?;
        let role = role_mut(&mut state, "GetRolePolicy", role_name)?;
        let document = role
            .inline_policies
            .get(policy_name)
            .ok_or_else(|| not_found("GetRolePolicy", policy_name))?;
        Ok((!document.is_empty()).then(|| document.clone()))
    }

    async fn list_instance_profiles_for_role(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> AwsResult<Page<InstanceProfileRecord>> {
        let mut state = self.enter("ListInstanceProfilesForRole", role_name)?;
        let role = role_mut(&mut state, "ListInstanceProfilesForRole", role_name)?;
        Ok(self.page(&role.instance_profiles, marker))
    }

    async fn remove_role_from_instance_profile(
        &self,
        instance_profile_name: &str,
        role_name: &str,
    ) -> AwsResult<()> {
        let mut state = self.enter("RemoveRoleFromInstanceProfile", instance_profile_name)?;
        let role = role_mut(&mut state, "RemoveRoleFromInstanceProfile", role_name)?;
        let before = role.instance_profiles.len();
        role.instance_profiles
            .retain(|p| p.instance_profile_name.as_deref() != Some(instance_profile_name));
        if role.instance_profiles.len() == before {
            return Err(not_found("RemoveRoleFromInstanceProfile", instance_profile_name));
        }
        Ok(())
    }

    async fn delete_instance_profile(&self, instance_profile_name: &str) -> AwsResult<()> {
        let mut state = self.enter("DeleteInstanceProfile", instance_profile_name)?;
        state.profiles_deleted.push(instance_profile_name.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> AwsResult<()> {
        let mut state = self.enter("DetachRolePolicy", policy_arn)?;
        let role = role_mut(&mut state, "DetachRolePolicy", role_name)?;
        let before = role.attached.len();
        role.attached
            .retain(|p| p.policy_arn.as_deref() != Some(policy_arn));
        if role.attached.len() == before {
            return Err(not_found("DetachRolePolicy", policy_arn));
        }
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> AwsResult<()> {
        let mut state = self.enter("DeleteRolePolicy", policy_name)?;
        let role = role_mut(&mut state, "DeleteRolePolicy", role_name)?;
        role.inline_policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| not_found("DeleteRolePolicy", policy_name))
    }

    async fn delete_role(&self, role_name: &str) -> AwsResult<()> {
        let mut state = self.enter("DeleteRole", role_name)?;
        let role = role_mut(&mut state, "DeleteRole", role_name)?;
        if !role.attached.is_empty()
            || !role.inline_policies.is_empty()
            || !role.instance_profiles.is_empty()
        {
            return Err(AwsError::IamError(format!(
                "DeleteRole {role_name}: DeleteConflict"
            )));
        }
        if !self.ignore_deletes {
            state.roles.remove(role_name);
        }
        Ok(())
    }
}

/// Connector handing out one [`FakeIam`] per account.
#[derive(Default)]
pub(crate) struct FakeConnector {
    accounts: HashMap<String, Arc<FakeIam>>,
    connected: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub(crate) fn with_account(mut self, account_id: &str, iam: Arc<FakeIam>) -> Self {
        self.accounts.insert(account_id.to_string(), iam);
        self
    }

    /// Accounts a client was built for, in order.
    pub(crate) fn connected(&self) -> Vec<String> {
        self.connected.lock().expect("lock").clone()
    }
}

impl IamConnector for FakeConnector {
    fn connect(&self, credential: &AccountCredential) -> Arc<dyn IamApi> {
        self.connected
            .lock()
            .expect("lock")
            .push(credential.account_id().to_string());
        match self.accounts.get(credential.account_id()) {
            Some(iam) => iam.clone(),
            None => Arc::new(FakeIam::default()),
        }
    }
}

/// Upload double: fails the first `transient_failures` attempts, or every
/// attempt with a permanent rejection.
#[derive(Default)]
pub(crate) struct FakeSink {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    attempts: Mutex<u32>,
    transient_failures: u32,
    reject: bool,
}

impl FakeSink {
    pub(crate) fn flaky(transient_failures: u32) -> Self {
        Self {
            transient_failures,
            ..Self::default()
        }
    }

    pub(crate) fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub(crate) fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().expect("lock").clone()
    }

    pub(crate) fn attempts(&self) -> u32 {
        *self.attempts.lock().expect("lock")
    }
}

#[async_trait]
impl ObjectSink for FakeSink {
    fn location(&self, key: &str) -> String {
        format!("memory://backups/{key}")
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> AwsResult<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("lock");
            *attempts += 1;
            *attempts
        };
        if self.reject {
            return Err(AwsError::UploadRejected(format!("{key}: NoSuchBucket")));
        }
        if attempt <= self.transient_failures {
            return Err(AwsError::UploadFailed(format!("{key}: SlowDown")));
        }
        self.uploads
            .lock()
            .expect("lock")
            .push((key.to_string(), body));
        Ok(())
    }
}
