//! Temporary credential bundles handed out by the delegation chain

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::SystemTime;

const PROVIDER_NAME: &str = "iam-role-decommission";

/// Raw temporary credentials as returned by an AssumeRole call, before the
/// identity behind them has been checked.
pub struct IssuedCredential {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedCredential {
    /// Static SDK credentials for building service clients.
    pub fn to_sdk_credentials(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.expose_secret().clone(),
            Some(self.session_token.expose_secret().clone()),
            self.expires_at.map(SystemTime::from),
            PROVIDER_NAME,
        )
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A scoped, time-limited credential whose account has been verified with
/// GetCallerIdentity. Never persisted and never cached across units of work.
#[derive(Debug)]
pub struct AccountCredential {
    issued: IssuedCredential,
    account_id: String,
}

impl AccountCredential {
    /// Bind issued credentials to the account id they were verified against.
    pub fn verified(issued: IssuedCredential, account_id: impl Into<String>) -> Self {
        Self {
            issued,
            account_id: account_id.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.issued.expires_at
    }

    pub fn to_sdk_credentials(&self) -> aws_credential_types::Credentials {
        self.issued.to_sdk_credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued() -> IssuedCredential {
        IssuedCredential {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: SecretString::new("very-secret".to_string()),
            session_token: SecretString::new("session-token".to_string()),
            expires_at: DateTime::from_timestamp(1_900_000_000, 0),
        }
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let credential = AccountCredential::verified(issued(), "123456789012");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("123456789012"));
        assert!(rendered.contains("ASIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("session-token"));
    }

    #[test]
    fn test_sdk_credentials_carry_session_token() {
        let credential = AccountCredential::verified(issued(), "123456789012");
        let sdk = credential.to_sdk_credentials();
        assert_eq!(sdk.access_key_id(), "ASIAEXAMPLE");
        assert_eq!(sdk.secret_access_key(), "very-secret");
        assert_eq!(sdk.session_token(), Some("session-token"));
        assert!(sdk.expiry().is_some());
        assert_eq!(credential.account_id(), "123456789012");
        assert!(credential.expires_at().is_some());
    }
}
