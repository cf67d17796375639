use super::{ObjectReader, ObjectStorage, ObjectWriter, validate_object_name};
use crate::config::S3Config;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio_util::sync::CancellationToken;

/// In-memory pipe between the writer and the uploader task
const PIPE_CAPACITY: usize = 64 * 1024;

/// Objects stored in an S3-compatible bucket
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    region: String,
    part_size: usize,
}

impl S3Storage {
    /// Build a client from static credentials; no network traffic happens here
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "dlhub-static",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            part_size: config.part_size,
        }
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(storage_error(
                    &format!("failed to check bucket {}", self.bucket),
                    e,
                ));
            }
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, "created storage bucket");
                Ok(())
            }
            Err(e)
                if e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                }) =>
            {
                Ok(())
            }
            Err(e) => Err(storage_error(
                &format!("failed to create bucket {}", self.bucket),
                e,
            )),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn writer(&self, name: &str) -> Result<ObjectWriter> {
        validate_object_name(name)?;

        let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
        let cancel = CancellationToken::new();
        let uploader = Uploader {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: name.to_string(),
            part_size: self.part_size,
        };

        let handle = tokio::spawn(uploader.run(source, cancel.clone()));
        Ok(ObjectWriter::for_upload(
            Box::pin(sink),
            cancel.drop_guard(),
            handle,
        ))
    }

    async fn reader(&self, name: &str) -> Result<ObjectReader> {
        validate_object_name(name)?;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    Error::NotFound(format!("object {name}"))
                } else {
                    storage_error(&format!("failed to read {name}"), e)
                }
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }
}

/// Drains the pipe into one object
///
/// An object that fits in a single part is sent with one PUT; anything larger
/// goes through a multipart upload that is aborted on error or cancellation.
struct Uploader {
    client: Client,
    bucket: String,
    key: String,
    part_size: usize,
}

impl Uploader {
    async fn run(self, mut source: DuplexStream, cancel: CancellationToken) -> Result<()> {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            part = read_part(&mut source, self.part_size) => part?,
        };

        if first.len() < self.part_size {
            // EOF may be the writer being dropped, so check before publishing
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.put_single(first) => result,
            };
        }

        let upload_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            id = self.create_multipart() => id?,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.upload_parts(&upload_id, first, &mut source, &cancel) => result,
        };

        if let Err(e) = result {
            self.abort_multipart(&upload_id).await;
            return Err(e);
        }
        Ok(())
    }

    async fn put_single(&self, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(body.into())
            .send()
            .await
            .map_err(|e| storage_error(&format!("failed to upload {}", self.key), e))?;
        Ok(())
    }

    async fn create_multipart(&self) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| {
                storage_error(&format!("failed to start upload of {}", self.key), e)
            })?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::Storage(format!("no upload id returned for {}", self.key)))
    }

    async fn upload_parts(
        &self,
        upload_id: &str,
        first: Vec<u8>,
        source: &mut DuplexStream,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut part_number = 1;
        let mut chunk = first;

        while !chunk.is_empty() {
            let last = chunk.len() < self.part_size;

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&self.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(chunk.into())
                .send()
                .await
                .map_err(|e| {
                    storage_error(
                        &format!("failed to upload part {} of {}", part_number, self.key),
                        e,
                    )
                })?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;

            if last {
                break;
            }
            chunk = read_part(source, self.part_size).await?;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::debug!(key = %self.key, parts = parts.len(), "completing multipart upload");
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                storage_error(&format!("failed to complete upload of {}", self.key), e)
            })?;
        Ok(())
    }

    async fn abort_multipart(&self, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %self.key,
                upload_id,
                error = %DisplayErrorContext(&e),
                "failed to abort multipart upload"
            );
        }
    }
}

/// Read up to `part_size` bytes; a short result means EOF
async fn read_part<R: AsyncRead + Unpin>(source: &mut R, part_size: usize) -> Result<Vec<u8>> {
    let mut part = Vec::with_capacity(part_size.min(PIPE_CAPACITY * 16));
    source.take(part_size as u64).read_to_end(&mut part).await?;
    Ok(part)
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    if let SdkError::ServiceError(service_err) = err {
        return service_err.raw().status().as_u16() == 404;
    }
    false
}

fn storage_error<E>(context: &str, err: SdkError<E>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Storage(format!("{}: {}", context, DisplayErrorContext(&err)))
}
