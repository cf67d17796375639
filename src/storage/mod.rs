//! Object storage for downloaded artifacts
//!
//! Two backends share one push-style interface:
//! - [`LocalStorage`] writes files under a root directory
//! - [`S3Storage`] streams into an S3-compatible bucket through a pipe that a
//!   background uploader drains part by part
//!
//! Writers must be completed with [`ObjectWriter::finish`]; a writer that is
//! aborted or dropped leaves no object behind in S3 mode, and an aborted
//! local writer removes its partial file.

use crate::config::{StorageConfig, StorageMode};
use crate::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

/// Readable object body
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Storage backend
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Open a writer for `name`, replacing any existing object once finished
    async fn writer(&self, name: &str) -> Result<ObjectWriter>;

    /// Open a reader for `name`; a missing object is [`Error::NotFound`]
    async fn reader(&self, name: &str) -> Result<ObjectReader>;
}

/// Build the backend selected by `config.mode`
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.mode {
        StorageMode::Local => Ok(Arc::new(LocalStorage::new(&config.download_dir).await?)),
        StorageMode::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                Error::config("storage.s3", "S3 storage mode requires an s3 section")
            })?;
            let storage = S3Storage::new(s3);
            storage.ensure_bucket().await?;
            Ok(Arc::new(storage))
        }
    }
}

/// Object names are flat; reject anything that could escape the root or bucket prefix
pub(crate) fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(Error::InvalidArgument(format!(
            "invalid object name: {name:?}"
        )));
    }
    Ok(())
}

enum Completion {
    /// Local file; removed on abort
    File { path: PathBuf },
    /// Background uploader; dropping the guard cancels it
    Upload {
        guard: DropGuard,
        handle: JoinHandle<Result<()>>,
    },
}

/// Push-style writer for one object
///
/// Implements [`AsyncWrite`]. Writes block when the backend cannot keep up.
pub struct ObjectWriter {
    // Dropped before `sink` so an S3 uploader is cancelled before it sees EOF
    completion: Completion,
    sink: Pin<Box<dyn AsyncWrite + Send>>,
    written: u64,
}

impl ObjectWriter {
    pub(crate) fn for_file(sink: Pin<Box<dyn AsyncWrite + Send>>, path: PathBuf) -> Self {
        Self {
            completion: Completion::File { path },
            sink,
            written: 0,
        }
    }

    pub(crate) fn for_upload(
        sink: Pin<Box<dyn AsyncWrite + Send>>,
        guard: DropGuard,
        handle: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            completion: Completion::Upload { guard, handle },
            sink,
            written: 0,
        }
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush and close the object, waiting until the backend has stored it
    ///
    /// Returns the object size.
    pub async fn finish(mut self) -> Result<u64> {
        let closed = self.sink.shutdown().await;

        match self.completion {
            Completion::File { .. } => {
                closed?;
            }
            Completion::Upload { guard, handle } => {
                let _ = guard.disarm();
                // The uploader's error explains a broken pipe better than the pipe does
                handle
                    .await
                    .map_err(|e| Error::Storage(format!("uploader task failed: {e}")))??;
                closed?;
            }
        }

        Ok(self.written)
    }

    /// Discard the object
    pub async fn abort(self) {
        let Self {
            completion, sink, ..
        } = self;

        match completion {
            Completion::File { path } => {
                drop(sink);
                if let Err(e) = tokio::fs::remove_file(&path).await
                    && e.kind() != io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file");
                }
            }
            Completion::Upload { guard, handle } => {
                // Cancel before the uploader can observe EOF
                drop(guard);
                drop(sink);
                match handle.await {
                    Ok(Ok(())) | Ok(Err(Error::Cancelled)) => {}
                    Ok(Err(e)) => tracing::debug!(error = %e, "aborted upload had already failed"),
                    Err(e) => tracing::warn!(error = %e, "uploader task failed"),
                }
            }
        }
    }
}

impl AsyncWrite for ObjectWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = self.sink.as_mut().poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sink.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sink.as_mut().poll_shutdown(cx)
    }
}
