//! ARN helpers for account ids and role names

/// Prefix of ARNs for policies owned and published by AWS itself.
pub const PLATFORM_POLICY_ARN_PREFIX: &str = "arn:aws:iam::aws:";

/// Extract 12-digit account ID from ARN (field 5 in colon-delimited format)
pub fn extract_account_from_arn(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() >= 6 {
        let account_id = parts[4];
        if is_account_id(account_id) {
            return Some(account_id.to_string());
        }
    }
    None
}

/// Extract the role name from an IAM role ARN, dropping any role path.
///
/// `arn:aws:iam::123456789012:role/service/app-role` yields `app-role`.
pub fn extract_role_name_from_arn(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() < 6 || parts[2] != "iam" {
        return None;
    }
    let resource = parts[5].strip_prefix("role/")?;
    resource
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Build the ARN of a role reached by name in the given account.
pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

/// A 12-digit numeric AWS account identifier.
pub fn is_account_id(candidate: &str) -> bool {
    candidate.len() == 12 && candidate.chars().all(|c| c.is_ascii_digit())
}

/// Managed policies published by AWS live under the `aws` pseudo-account.
pub fn is_platform_policy(policy_arn: &str) -> bool {
    policy_arn.starts_with(PLATFORM_POLICY_ARN_PREFIX)
}
