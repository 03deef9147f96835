//! Remote backup sink backed by S3

use crate::aws::{AwsError, AwsResult};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

/// Error codes that no amount of retrying will fix.
const PERMANENT_UPLOAD_CODES: [&str; 2] = ["NoSuchBucket", "AccessDenied"];

/// An opaque upload destination for backup documents.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Human-readable location of `key`, used in logs and reports.
    fn location(&self, key: &str) -> String;

    async fn put_object(&self, key: &str, body: Vec<u8>) -> AwsResult<()>;
}

pub struct S3ObjectSink {
    client: S3Client,
    bucket: String,
}

impl S3ObjectSink {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Sink using the ambient process identity.
    pub fn from_config(config: &SdkConfig, bucket: impl Into<String>) -> Self {
        Self::new(S3Client::new(config), bucket)
    }
}

#[async_trait]
impl ObjectSink for S3ObjectSink {
    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> AwsResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let code = e.as_service_error().and_then(ProvideErrorMetadata::code);
                let message = format!(
                    "PutObject {} failed: {}",
                    self.location(key),
                    DisplayErrorContext(&e)
                );
                match code {
                    Some(code) if PERMANENT_UPLOAD_CODES.contains(&code) => {
                        AwsError::UploadRejected(message)
                    }
                    _ => AwsError::UploadFailed(message),
                }
            })?;
        Ok(())
    }
}
