//! AWS SDK integration: STS delegation, IAM role directory, S3 backup sink, ARN helpers.

pub mod arn;
pub mod credentials;
pub mod iam_client;
pub mod s3;
pub mod sts;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AwsError {
    #[error("AWS configuration error: {0}")]
    ConfigError(String),
    #[error("IAM client error: {0}")]
    IamError(String),
    #[error("IAM entity not found: {0}")]
    NoSuchEntity(String),
    #[error("Policy document error: {0}")]
    PolicyError(String),
    #[error("AWS SDK error: {0}")]
    SdkError(String),
    #[error("S3 upload failed: {0}")]
    UploadFailed(String),
    #[error("S3 upload rejected: {0}")]
    UploadRejected(String),
}

impl AwsError {
    /// True when IAM reported `NoSuchEntity` for the addressed entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchEntity(_))
    }

    /// Upload failures worth another attempt. A missing bucket or denied
    /// access will not fix itself between attempts.
    pub fn is_retryable_upload(&self) -> bool {
        matches!(self, Self::UploadFailed(_))
    }
}

pub type AwsResult<T> = Result<T, AwsError>;

/// Convert an SDK timestamp into a chrono UTC timestamp.
pub(crate) fn to_utc(
    value: &aws_sdk_iam::primitives::DateTime,
) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}
