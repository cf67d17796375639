//! Type-specific transfer implementations.

use crate::config::DownloadConfig;
use crate::storage::ObjectWriter;
use crate::types::{DownloadType, metadata_keys};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Fallback when the server sends no `Content-Type`
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Fetches a resource into an object writer
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `sink` and describe the transfer
    ///
    /// The writer is left open; the caller finishes or aborts it.
    async fn download(
        &self,
        url: &str,
        sink: &mut ObjectWriter,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>>;
}

/// Downloaders by task type
pub struct Downloaders {
    http: HttpDownloader,
}

impl Downloaders {
    /// Build the downloaders for every supported type
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        Ok(Self {
            http: HttpDownloader::new(config)?,
        })
    }

    /// Downloader for `download_type`
    pub fn resolve(&self, download_type: DownloadType) -> Result<&dyn Downloader> {
        match download_type {
            DownloadType::Http => Ok(&self.http),
            DownloadType::Unspecified => Err(Error::NotSupported(format!(
                "download type {download_type:?} is not supported"
            ))),
        }
    }
}

/// Plain HTTP(S) GET
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Build a client with the configured user agent and connect timeout
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        sink: &mut ObjectWriter,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        let response = response.error_for_status()?;

        let mut metadata = BTreeMap::new();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        metadata.insert(metadata_keys::CONTENT_TYPE.to_string(), content_type.to_string());
        if let Some(length) = response.content_length() {
            metadata.insert(metadata_keys::CONTENT_LENGTH.to_string(), length.to_string());
        }

        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(bytes) => sink.write_all(&bytes?).await?,
                None => break,
            }
        }

        metadata.insert(metadata_keys::SIZE.to_string(), sink.bytes_written().to_string());
        Ok(metadata)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStorage, ObjectStorage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_download_collects_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/x-test")
                    .set_body_bytes(vec![42u8; 1000]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let mut writer = storage.writer("out").await.unwrap();

        let downloaders = Downloaders::new(&DownloadConfig::default()).unwrap();
        let metadata = downloaders
            .resolve(DownloadType::Http)
            .unwrap()
            .download(
                &format!("{}/file.bin", server.uri()),
                &mut writer,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        writer.finish().await.unwrap();

        assert_eq!(metadata[metadata_keys::CONTENT_TYPE], "application/x-test");
        assert_eq!(metadata[metadata_keys::CONTENT_LENGTH], "1000");
        assert_eq!(metadata[metadata_keys::SIZE], "1000");
        assert_eq!(std::fs::read(dir.path().join("out")).unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn error_status_fails_the_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let mut writer = storage.writer("out").await.unwrap();

        let result = HttpDownloader::new(&DownloadConfig::default())
            .unwrap()
            .download(&server.uri(), &mut writer, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
        writer.abort().await;
    }

    #[tokio::test]
    async fn cancelled_before_response_is_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(10)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let mut writer = storage.writer("out").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = HttpDownloader::new(&DownloadConfig::default())
            .unwrap()
            .download(&server.uri(), &mut writer, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        writer.abort().await;
    }

    #[test]
    fn unspecified_type_is_not_supported() {
        let downloaders = Downloaders::new(&DownloadConfig::default()).unwrap();
        assert!(matches!(
            downloaders.resolve(DownloadType::Unspecified),
            Err(Error::NotSupported(_))
        ));
    }
}
