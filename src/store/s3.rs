use super::{MediaStore, RemoteMedia};
use crate::image::detect_format;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, types::ObjectCannedAcl, Client as S3Client};
use std::path::Path;
use uuid::Uuid;

/// Media store backed by an S3-compatible bucket.
///
/// The object key doubles as the media identifier.
pub struct S3MediaStore {
    client: S3Client,
    bucket: String,
    base_url: String,
}

impl S3MediaStore {
    pub async fn new(
        access_key_id: String,
        secret_access_key: String,
        endpoint: String,
        bucket: String,
        base_url: String,
    ) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "media-store",
        );

        // S3-compatible providers ignore the region but the SDK requires one
        let config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .load()
            .await;

        let client = S3Client::new(&config);

        Ok(Self {
            client,
            bucket,
            base_url,
        })
    }
}

fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

fn classify_put_error(err: SdkError<PutObjectError>) -> Error {
    let message = format!("Failed to upload file: {}", DisplayErrorContext(&err));
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(context) => {
            let status = context.raw().status();
            status.is_server_error() || status.as_u16() == 429
        }
        _ => false,
    };

    if transient {
        Error::UploadTransient(message)
    } else {
        Error::UploadRejected(message)
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload(&self, path: &Path) -> Result<RemoteMedia> {
        let data = tokio::fs::read(path).await?;
        let format = detect_format(&data).ok_or_else(|| {
            Error::UploadRejected(format!("{} is not a supported image", path.display()))
        })?;

        let key = format!("images/{}.{}", Uuid::new_v4(), format.extension());
        let body = ByteStream::from(data);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(format.mime())
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(classify_put_error)?;

        tracing::info!("Uploaded {} to bucket {} as {}", path.display(), self.bucket, key);

        Ok(RemoteMedia {
            url: public_url(&self.base_url, &key),
            media_id: key,
        })
    }
}
