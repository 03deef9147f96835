//! Account/role target lists
//!
//! File format: one `account_id,role_name` pair per line. Fields are trimmed,
//! anything after the role is ignored, blank lines and `#` comments are
//! skipped. One malformed line rejects the whole file before any work starts.

use crate::aws::arn::is_account_id;
use crate::error::FatalError;
use log::info;
use serde::Serialize;
use std::path::Path;

/// Roles to process in one account, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAssignment {
    pub account_id: String,
    pub roles: Vec<String>,
}

fn validate_pair(line: usize, account_id: &str, role_name: &str) -> Result<(), FatalError> {
    if !is_account_id(account_id) {
        return Err(FatalError::InvalidInput {
            line,
            detail: format!("invalid AWS account id '{account_id}', must be 12 digits"),
        });
    }
    if role_name.is_empty() {
        return Err(FatalError::InvalidInput {
            line,
            detail: format!("account {account_id} has an empty role name"),
        });
    }
    Ok(())
}

/// Parse the account file contents. Lines naming the same account are
/// grouped under it in first-seen order.
pub fn parse_assignments(contents: &str) -> Result<Vec<AccountAssignment>, FatalError> {
    let mut assignments: Vec<AccountAssignment> = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split(',').map(str::trim);
        let account_id = fields.next().unwrap_or_default();
        let Some(role_name) = fields.next() else {
            return Err(FatalError::InvalidInput {
                line,
                detail: "expected 'account_id,role_name'".to_string(),
            });
        };
        validate_pair(line, account_id, role_name)?;

        match assignments.iter_mut().find(|a| a.account_id == account_id) {
            Some(existing) => existing.roles.push(role_name.to_string()),
            None => assignments.push(AccountAssignment {
                account_id: account_id.to_string(),
                roles: vec![role_name.to_string()],
            }),
        }
    }

    if assignments.is_empty() {
        return Err(FatalError::EmptyInput);
    }
    Ok(assignments)
}

pub fn load_assignments(path: &Path) -> Result<Vec<AccountAssignment>, FatalError> {
    let contents = std::fs::read_to_string(path).map_err(|source| FatalError::InputRead {
        path: path.to_path_buf(),
        source,
    })?;
    let assignments = parse_assignments(&contents)?;
    info!(
        "Read {} account(s) from {}",
        assignments.len(),
        path.display()
    );
    Ok(assignments)
}

/// A single account/role target, validated like a file line.
pub fn single_assignment(account_id: &str, role_name: &str) -> Result<AccountAssignment, FatalError> {
    let account_id = account_id.trim();
    let role_name = role_name.trim();
    validate_pair(1, account_id, role_name)?;
    Ok(AccountAssignment {
        account_id: account_id.to_string(),
        roles: vec![role_name.to_string()],
    })
}
